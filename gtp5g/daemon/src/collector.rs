//! Event collection and aggregation
//!
//! Aggregates events drained from the ring buffer into a report.

use crate::types::*;
use gtp5g_common::{constants::WIRE_VERSION, DecodeError};
use log::debug;
use std::collections::{BTreeMap, HashSet};

#[derive(Default)]
struct ProcessTracker {
    comm: String,
    threads: HashSet<u32>,
    events: u64,
}

/// Collector for decoded gtp5g events
#[derive(Default)]
pub struct EventCollector {
    /// Total number of events decoded
    total_events: u64,
    /// Records rejected by the decoder
    malformed_records: u64,
    /// Call site breakdown
    call_sites: CallSiteBreakdown,
    /// Per-CPU ordering and volume
    cpus: BTreeMap<u32, CpuStats>,
    /// Processes keyed by tgid
    processes: BTreeMap<u32, ProcessTracker>,
}

impl EventCollector {
    /// Create a new collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a raw record and add it
    pub fn add_record(&mut self, data: &[u8]) -> Result<GtpEvent, DecodeError> {
        let decoded = GtpEvent::decode(data);
        self.add_decoded(&decoded);
        decoded
    }

    /// Add the result of decoding one record
    pub fn add_decoded(&mut self, decoded: &Result<GtpEvent, DecodeError>) {
        match decoded {
            Ok(event) => self.add_event(event),
            Err(e) => {
                debug!("Dropping malformed record: {}", e);
                self.malformed_records += 1;
            }
        }
    }

    /// Add a decoded event
    pub fn add_event(&mut self, event: &GtpEvent) {
        if let Some(call_site) = event.call_site() {
            self.call_sites.add(call_site);
        }

        let cpu = self.cpus.entry(event.cpu).or_insert_with(|| CpuStats {
            first_ts_ns: event.ts_ns,
            last_ts_ns: event.ts_ns,
            ..CpuStats::default()
        });
        if event.ts_ns < cpu.last_ts_ns {
            cpu.out_of_order += 1;
        } else {
            cpu.last_ts_ns = event.ts_ns;
        }
        cpu.first_ts_ns = cpu.first_ts_ns.min(event.ts_ns);
        cpu.events += 1;

        let process = self.processes.entry(event.tgid).or_default();
        // Names that are not UTF-8 keep the last readable one
        if let Some(comm) = event.comm_str() {
            if process.comm != comm {
                process.comm = comm.to_owned();
            }
        }
        process.threads.insert(event.pid);
        process.events += 1;

        self.total_events += 1;
    }

    /// Generate the aggregated report
    ///
    /// # Arguments
    ///
    /// * `elapsed_secs` - Duration of collection period in seconds
    /// * `producer` - Producer-side counters, if they could be read
    pub fn generate_report(&self, elapsed_secs: u64, producer: Option<ProducerStats>) -> CaptureReport {
        let processes = self
            .processes
            .iter()
            .map(|(tgid, tracker)| {
                (
                    *tgid,
                    ProcessStats {
                        comm: tracker.comm.clone(),
                        threads: tracker.threads.len() as u64,
                        events: tracker.events,
                    },
                )
            })
            .collect();

        CaptureReport {
            timestamp: chrono::Utc::now().to_rfc3339(),
            duration_seconds: elapsed_secs,
            wire_version: WIRE_VERSION,
            total_events: self.total_events,
            malformed_records: self.malformed_records,
            call_sites: self.call_sites.clone(),
            cpus: self.cpus.clone(),
            processes,
            producer,
            estimated_loss: producer.map(|p| p.total_hits().saturating_sub(self.total_events)),
        }
    }

    /// Get current event count
    pub fn event_count(&self) -> u64 {
        self.total_events
    }

    /// Get number of malformed records
    pub fn malformed_count(&self) -> u64 {
        self.malformed_records
    }

    /// Get number of distinct processes
    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Get call site breakdown reference
    pub fn call_sites(&self) -> &CallSiteBreakdown {
        &self.call_sites
    }

    /// Get per-CPU statistics
    pub fn cpu_stats(&self, cpu: u32) -> Option<&CpuStats> {
        self.cpus.get(&cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gtp5g_common::comm_from_bytes;

    fn event(call_site: CallSite, ts_ns: u64, cpu: u32, pid_tgid: u64, comm: &[u8]) -> GtpEvent {
        GtpEvent::new(call_site, ts_ns, cpu, pid_tgid, comm_from_bytes(comm))
    }

    #[test]
    fn test_collector_basic() {
        let mut collector = EventCollector::new();

        let decoded = collector
            .add_record(&event(CallSite::Ingress, 100, 0, 0x0000_0001_0000_04D2, b"nr-gnb").encode())
            .unwrap();

        assert_eq!(decoded.pid, 1234);
        assert_eq!(decoded.tgid, 1);
        assert_eq!(collector.event_count(), 1);
        assert_eq!(collector.process_count(), 1);
        assert_eq!(collector.call_sites().gtp5g_handle_skb_ipv4, 1);
    }

    #[test]
    fn test_malformed_records_are_counted() {
        let mut collector = EventCollector::new();

        assert!(collector.add_record(&[0u8; 12]).is_err());
        let mut bad = event(CallSite::Egress, 1, 0, 1, b"x").encode();
        bad[56] = 9;
        assert!(collector.add_record(&bad).is_err());

        assert_eq!(collector.malformed_count(), 2);
        assert_eq!(collector.event_count(), 0);
    }

    #[test]
    fn test_per_cpu_ordering() {
        let mut collector = EventCollector::new();

        collector.add_event(&event(CallSite::Egress, 10, 1, 7, b"a"));
        collector.add_event(&event(CallSite::Egress, 20, 1, 7, b"a"));
        collector.add_event(&event(CallSite::Egress, 15, 1, 7, b"a"));
        // A different CPU has its own clock sequence
        collector.add_event(&event(CallSite::Egress, 5, 2, 7, b"a"));

        let cpu1 = collector.cpu_stats(1).unwrap();
        assert_eq!(cpu1.events, 3);
        assert_eq!(cpu1.first_ts_ns, 10);
        assert_eq!(cpu1.last_ts_ns, 20);
        assert_eq!(cpu1.out_of_order, 1);
        assert_eq!(collector.cpu_stats(2).unwrap().out_of_order, 0);
    }

    #[test]
    fn test_report_processes_and_loss() {
        let mut collector = EventCollector::new();

        collector.add_event(&event(CallSite::Ingress, 1, 0, (100 << 32) | 101, b"nr-gnb"));
        collector.add_event(&event(CallSite::Ingress, 2, 0, (100 << 32) | 102, b"nr-gnb"));
        collector.add_event(&event(CallSite::Egress, 3, 0, (200 << 32) | 200, b"nr-ue"));

        let producer = ProducerStats {
            ingress_hits: 4,
            egress_hits: 1,
            dropped_events: 2,
        };
        let report = collector.generate_report(5, Some(producer));

        assert_eq!(report.total_events, 3);
        assert_eq!(report.duration_seconds, 5);
        assert_eq!(report.estimated_loss, Some(2));
        assert_eq!(report.processes[&100].threads, 2);
        assert_eq!(report.processes[&100].events, 2);
        assert_eq!(report.processes[&100].comm, "nr-gnb");
        assert_eq!(report.processes[&200].comm, "nr-ue");
        assert_eq!(report.call_sites.gtp5g_dev_xmit, 1);

        assert_eq!(report.wire_version, 1);

        let without_producer = collector.generate_report(5, None);
        assert_eq!(without_producer.estimated_loss, None);
    }

    #[test]
    fn test_process_comm_skips_invalid_utf8() {
        let mut collector = EventCollector::new();

        collector.add_event(&event(CallSite::Ingress, 1, 0, (100 << 32) | 101, b"nr-gnb"));
        collector.add_event(&event(CallSite::Ingress, 2, 0, (100 << 32) | 101, &[0xFF, 0xFE]));

        let report = collector.generate_report(1, None);
        assert_eq!(report.processes[&100].comm, "nr-gnb");
        assert_eq!(report.processes[&100].events, 2);
    }
}
