//! In-process producers
//!
//! Runs the real capture handler body on ordinary threads, one per simulated
//! CPU, against a host [`RingChannel`]. This is the userspace counterpart of
//! the kprobe attachment and exercises the same reserve/fill/publish path.
//!
//! [`RingChannel`]: crate::channel::RingChannel

use crate::{clock::monotonic_ns, types::ProducerStats};
use anyhow::{anyhow, bail, Result};
use gtp5g_common::{
    capture, comm_from_bytes, CallSite, CaptureEnv, CaptureOutcome, EventSink, TASK_COMM_LEN,
};
use log::info;
use std::thread;

/// A task pinned to one simulated CPU
#[derive(Clone, Copy, Debug)]
pub struct SimulatedTask {
    cpu: u32,
    pid_tgid: u64,
    comm: [u8; TASK_COMM_LEN],
}

impl SimulatedTask {
    pub fn new(cpu: u32, pid_tgid: u64, name: &str) -> Self {
        Self {
            cpu,
            pid_tgid,
            comm: comm_from_bytes(name.as_bytes()),
        }
    }
}

impl CaptureEnv for SimulatedTask {
    fn ktime_ns(&self) -> u64 {
        monotonic_ns()
    }

    fn cpu_id(&self) -> u32 {
        self.cpu
    }

    fn pid_tgid(&self) -> u64 {
        self.pid_tgid
    }

    fn comm(&self) -> [u8; TASK_COMM_LEN] {
        self.comm
    }
}

/// Simulation parameters
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Number of producer threads (simulated CPUs)
    pub cpus: u32,
    /// Handler invocations per producer
    pub invocations: u64,
    /// Call sites each producer cycles through
    pub call_sites: Vec<CallSite>,
}

/// Outcome of a simulation run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimulationOutcome {
    /// Per call site invocations and drops, as the kernel STATS map reports them
    pub producer: ProducerStats,
    /// Invocations whose event was published
    pub published: u64,
}

/// Drives capture handlers from userspace threads
pub struct Simulator {
    config: SimulationConfig,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.cpus == 0 {
            bail!("At least one simulated CPU is required");
        }
        if config.call_sites.is_empty() {
            bail!("At least one call site is required");
        }
        Ok(Self { config })
    }

    /// Task run by the producer on `cpu`
    ///
    /// Even CPUs run as the gNB, odd CPUs as the UE; each producer is its
    /// own thread inside its process.
    pub fn task_for(cpu: u32) -> SimulatedTask {
        let (tgid, name) = if cpu % 2 == 0 { (4242u64, "nr-gnb") } else { (4343u64, "nr-ue") };
        SimulatedTask::new(cpu, (tgid << 32) | (tgid + 1 + cpu as u64), name)
    }

    /// Run all producers to completion
    ///
    /// Blocks the calling thread. Producers never wait on the consumer, so
    /// this returns even if nothing drains the channel. Fails if any
    /// producer thread panicked.
    pub fn run<S>(&self, sink: &S) -> Result<SimulationOutcome>
    where
        S: EventSink + Sync,
    {
        info!(
            "Simulating {} invocations on each of {} CPUs",
            self.config.invocations, self.config.cpus
        );

        let per_cpu: Vec<SimulationOutcome> = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.config.cpus)
                .map(|cpu| {
                    let call_sites = &self.config.call_sites;
                    let invocations = self.config.invocations;
                    scope.spawn(move || {
                        let task = Self::task_for(cpu);
                        let mut outcome = SimulationOutcome::default();

                        for i in 0..invocations {
                            let call_site = call_sites[(i % call_sites.len() as u64) as usize];
                            match call_site {
                                CallSite::Ingress => outcome.producer.ingress_hits += 1,
                                CallSite::Egress => outcome.producer.egress_hits += 1,
                            }
                            match capture(&task, sink, call_site) {
                                CaptureOutcome::Published => outcome.published += 1,
                                CaptureOutcome::Dropped => outcome.producer.dropped_events += 1,
                            }
                        }
                        outcome
                    })
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(cpu, handle)| {
                    handle
                        .join()
                        .map_err(|_| anyhow!("Producer on simulated CPU {} panicked", cpu))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        Ok(per_cpu.iter().fold(SimulationOutcome::default(), |mut total, outcome| {
            total.producer.ingress_hits += outcome.producer.ingress_hits;
            total.producer.egress_hits += outcome.producer.egress_hits;
            total.producer.dropped_events += outcome.producer.dropped_events;
            total.published += outcome.published;
            total
        }))
    }
}
