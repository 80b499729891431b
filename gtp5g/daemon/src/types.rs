//! Userspace type definitions
//!
//! Defines the data structures used by the userspace program for
//! report generation and export.
//!
//! ## Organization
//!
//! - **Kernel Types**: the event schema shared with the eBPF program (from gtp5g_common)
//! - **Userspace Types**: aggregated report types, serialized by the exporters

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Kernel Types (from eBPF programs)
// ============================================================================

pub mod kernel {
    //! Types shared between kernel eBPF programs and userspace
    //!
    //! These are re-exported from the gtp5g-common crate and must
    //! maintain binary compatibility with the eBPF programs.

    pub use gtp5g_common::constants;
    pub use gtp5g_common::types::{CallSite, GtpEvent};
}

// Re-export commonly used kernel types at module level for convenience
pub use kernel::{CallSite, GtpEvent};

/// Aggregated capture report
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CaptureReport {
    /// ISO 8601 timestamp when the report was generated
    pub timestamp: String,
    /// Duration of the collection period in seconds
    pub duration_seconds: u64,
    /// Layout version of the decoded event records
    pub wire_version: u32,
    /// Events received and decoded
    pub total_events: u64,
    /// Records that failed to decode
    pub malformed_records: u64,
    /// Events per instrumented function
    pub call_sites: CallSiteBreakdown,
    /// Per-CPU statistics, keyed by CPU id
    pub cpus: BTreeMap<u32, CpuStats>,
    /// Processes seen in events, keyed by tgid
    pub processes: BTreeMap<u32, ProcessStats>,
    /// Producer-side counters, when available
    pub producer: Option<ProducerStats>,
    /// Producer invocations that never reached the consumer
    pub estimated_loss: Option<u64>,
}

/// Event counts per call site
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct CallSiteBreakdown {
    /// Events from gtp5g_handle_skb_ipv4 (call site 1)
    pub gtp5g_handle_skb_ipv4: u64,
    /// Events from gtp5g_dev_xmit (call site 2)
    pub gtp5g_dev_xmit: u64,
}

impl CallSiteBreakdown {
    pub fn add(&mut self, call_site: CallSite) {
        match call_site {
            CallSite::Ingress => self.gtp5g_handle_skb_ipv4 += 1,
            CallSite::Egress => self.gtp5g_dev_xmit += 1,
        }
    }

    pub fn get(&self, call_site: CallSite) -> u64 {
        match call_site {
            CallSite::Ingress => self.gtp5g_handle_skb_ipv4,
            CallSite::Egress => self.gtp5g_dev_xmit,
        }
    }

    pub fn total(&self) -> u64 {
        self.gtp5g_handle_skb_ipv4 + self.gtp5g_dev_xmit
    }
}

/// Statistics for events produced on one CPU
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct CpuStats {
    /// Number of events from this CPU
    pub events: u64,
    /// Earliest timestamp seen (nanoseconds)
    pub first_ts_ns: u64,
    /// Latest timestamp seen (nanoseconds)
    pub last_ts_ns: u64,
    /// Events whose timestamp was older than the previous event of this CPU
    pub out_of_order: u64,
}

/// Statistics for one process (tgid)
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessStats {
    /// Most recent command name
    pub comm: String,
    /// Distinct thread IDs seen
    pub threads: u64,
    /// Number of events
    pub events: u64,
}

/// Counters kept by the producers
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProducerStats {
    /// Handler invocations at gtp5g_handle_skb_ipv4
    pub ingress_hits: u64,
    /// Handler invocations at gtp5g_dev_xmit
    pub egress_hits: u64,
    /// Events dropped because the ring buffer was full
    pub dropped_events: u64,
}

impl ProducerStats {
    pub fn total_hits(&self) -> u64 {
        self.ingress_hits + self.egress_hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_site_breakdown() {
        let mut breakdown = CallSiteBreakdown::default();
        breakdown.add(CallSite::Ingress);
        breakdown.add(CallSite::Egress);
        breakdown.add(CallSite::Egress);

        assert_eq!(breakdown.get(CallSite::Ingress), 1);
        assert_eq!(breakdown.get(CallSite::Egress), 2);
        assert_eq!(breakdown.total(), 3);
    }
}
