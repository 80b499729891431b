//! Event processing from ring buffers
//!
//! Drains the kernel EVENTS ring buffer (or a host [`RingChannel`]) and feeds
//! decoded records into the shared collector.
//!
//! [`RingChannel`]: crate::channel::RingChannel

use crate::{channel::RingConsumer, clock::monotonic_to_wall, collector::EventCollector};
use anyhow::{Context, Result};
use aya::maps::{MapData, RingBuf};
use bytes::BytesMut;
use gtp5g_common::{constants::EVENT_RECORD_SIZE, DecodeError, GtpEvent};
use log::{debug, info, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::unix::AsyncFd,
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{interval, sleep},
};

/// Event processor that reads from ring buffers
pub struct EventProcessor {
    collector: Arc<Mutex<EventCollector>>,
    verbose: bool,
}

impl EventProcessor {
    /// Create a new event processor
    ///
    /// # Arguments
    ///
    /// * `collector` - Shared event collector
    /// * `verbose` - Log every decoded event
    pub fn new(collector: Arc<Mutex<EventCollector>>, verbose: bool) -> Self {
        Self { collector, verbose }
    }

    /// Spawn the kernel ring buffer reader
    ///
    /// Waits on the map's file descriptor, so the task sleeps until the
    /// kernel signals new data. Once `shutdown` flips to `true` (or its
    /// sender is dropped) the reader drains what is left and returns.
    pub fn spawn_ring_reader(
        &self,
        ring: RingBuf<MapData>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>> {
        let mut poll = AsyncFd::new(ring).context("Failed to register EVENTS ring buffer with tokio")?;
        let collector = Arc::clone(&self.collector);
        let verbose = self.verbose;

        info!("Spawning ring buffer reader");

        Ok(tokio::spawn(async move {
            let mut batch: Vec<Result<GtpEvent, DecodeError>> = Vec::new();

            loop {
                let readable = tokio::select! {
                    guard = poll.readable_mut() => Some(guard),
                    _ = shutdown.wait_for(|stop| *stop) => None,
                };

                let stopping = match readable {
                    Some(Ok(mut guard)) => {
                        let ring = guard.get_inner_mut();
                        while let Some(item) = ring.next() {
                            batch.push(GtpEvent::decode(&item));
                        }
                        guard.clear_ready();
                        false
                    }
                    Some(Err(e)) => {
                        warn!("Error waiting on ring buffer: {}", e);
                        true
                    }
                    None => {
                        let ring = poll.get_mut();
                        while let Some(item) = ring.next() {
                            batch.push(GtpEvent::decode(&item));
                        }
                        true
                    }
                };

                let mut collector = collector.lock().await;
                for decoded in batch.drain(..) {
                    if verbose {
                        log_event(&decoded);
                    }
                    collector.add_decoded(&decoded);
                }

                if stopping {
                    debug!("Ring buffer reader stopped");
                    return;
                }
            }
        }))
    }

    /// Spawn a polling reader for a host ring channel
    ///
    /// Returns once `stop` is set and the channel is empty.
    pub fn spawn_channel_reader(
        &self,
        mut consumer: RingConsumer,
        poll_interval: Duration,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let collector = Arc::clone(&self.collector);
        let verbose = self.verbose;

        tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(EVENT_RECORD_SIZE);

            loop {
                // Read the flag first so nothing published before it was set is missed
                let stopping = stop.load(Ordering::Acquire);

                let drained = {
                    let mut collector = collector.lock().await;
                    drain_channel(&mut consumer, &mut collector, &mut buf, verbose)
                };

                if drained == 0 {
                    if stopping {
                        return;
                    }
                    sleep(poll_interval).await;
                }
            }
        })
    }

    /// Spawn progress reporter
    ///
    /// Creates a task that periodically reports collection progress.
    ///
    /// # Arguments
    ///
    /// * `interval_secs` - Reporting interval in seconds
    pub fn spawn_progress_reporter(&self, interval_secs: u64) -> JoinHandle<()> {
        let collector = Arc::clone(&self.collector);

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

            loop {
                ticker.tick().await;

                let collector = collector.lock().await;
                info!(
                    "Progress: {} events collected, {} processes, {} malformed",
                    collector.event_count(),
                    collector.process_count(),
                    collector.malformed_count()
                );
            }
        })
    }
}

/// Read every published record currently in the channel
///
/// Returns the number of records read.
pub fn drain_channel(
    consumer: &mut RingConsumer,
    collector: &mut EventCollector,
    buf: &mut BytesMut,
    verbose: bool,
) -> u64 {
    let mut count = 0;
    while consumer.read_into(buf) {
        let decoded = GtpEvent::decode(&buf[..]);
        if verbose {
            log_event(&decoded);
        }
        collector.add_decoded(&decoded);
        count += 1;
    }
    count
}

fn log_event(decoded: &Result<GtpEvent, DecodeError>) {
    match decoded {
        Ok(event) => debug!(
            "Event: {} cpu={} pid={} tgid={} comm={} at {}",
            event.call_site().map(|site| site.symbol()).unwrap_or("?"),
            event.cpu,
            event.pid,
            event.tgid,
            event.comm_str().unwrap_or("?"),
            monotonic_to_wall(event.ts_ns).to_rfc3339()
        ),
        Err(e) => warn!("Malformed record: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RingChannel;
    use gtp5g_common::{capture, comm_from_bytes, CallSite, CaptureEnv, TASK_COMM_LEN};

    struct Task;

    impl CaptureEnv for Task {
        fn ktime_ns(&self) -> u64 {
            crate::clock::monotonic_ns()
        }
        fn cpu_id(&self) -> u32 {
            0
        }
        fn pid_tgid(&self) -> u64 {
            0x0000_0001_0000_04D2
        }
        fn comm(&self) -> [u8; TASK_COMM_LEN] {
            comm_from_bytes(b"nr-gnb")
        }
    }

    #[tokio::test]
    async fn test_event_processor_creation() {
        let collector = Arc::new(Mutex::new(EventCollector::new()));
        let processor = EventProcessor::new(collector, true);

        assert!(processor.verbose);
    }

    #[test]
    fn test_drain_channel_decodes_published_events() {
        let (channel, mut consumer) = RingChannel::open(1 << 12).unwrap();
        let mut collector = EventCollector::new();
        let mut buf = BytesMut::new();

        capture(&Task, &*channel, CallSite::Ingress);
        capture(&Task, &*channel, CallSite::Egress);

        assert_eq!(drain_channel(&mut consumer, &mut collector, &mut buf, false), 2);
        assert_eq!(collector.event_count(), 2);
        assert_eq!(collector.call_sites().gtp5g_handle_skb_ipv4, 1);
        assert_eq!(collector.call_sites().gtp5g_dev_xmit, 1);
        assert_eq!(drain_channel(&mut consumer, &mut collector, &mut buf, false), 0);
    }

    #[tokio::test]
    async fn test_channel_reader_stops_after_draining() {
        let (channel, consumer) = RingChannel::open(1 << 12).unwrap();
        let collector = Arc::new(Mutex::new(EventCollector::new()));
        let processor = EventProcessor::new(Arc::clone(&collector), false);
        let stop = Arc::new(AtomicBool::new(false));

        let reader = processor.spawn_channel_reader(consumer, Duration::from_millis(1), Arc::clone(&stop));

        for _ in 0..10 {
            capture(&Task, &*channel, CallSite::Egress);
        }
        stop.store(true, Ordering::Release);
        reader.await.unwrap();

        assert_eq!(collector.lock().await.event_count(), 10);
    }
}
