//! Shared constants for the gtp5g probe
//!
//! These constants are used by both kernel and userspace programs
//! to ensure consistency in behavior and limits.

// ============================================================================
// Ring Buffer
// ============================================================================

/// Byte size of the EVENTS ring buffer (16 MiB)
///
/// Must be a power of two and a multiple of the page size.
pub const RINGBUF_BYTE_SIZE: u32 = 1 << 24;

/// Name of the ring buffer map in the eBPF object
pub const EVENTS_MAP: &str = "EVENTS";

/// Name of the per-CPU statistics map in the eBPF object
pub const STATS_MAP: &str = "STATS";

// ============================================================================
// Event Layout
// ============================================================================

/// Length of a task command name, as in the kernel's TASK_COMM_LEN
pub const TASK_COMM_LEN: usize = 16;

/// Number of bytes carrying event fields
pub const EVENT_PAYLOAD_LEN: usize = 60;

/// Size of one encoded event record, including trailing padding
pub const EVENT_RECORD_SIZE: usize = 64;

/// Version of the event wire layout
pub const WIRE_VERSION: u32 = 1;

// ============================================================================
// Attachment Points
// ============================================================================

/// Ingress handler of the gtp5g driver (call site 1)
pub const INGRESS_SYMBOL: &str = "gtp5g_handle_skb_ipv4";

/// Transmit routine of the gtp5g driver (call site 2)
pub const EGRESS_SYMBOL: &str = "gtp5g_dev_xmit";

// ============================================================================
// Statistics Counter Indices (for STATS map)
// ============================================================================

/// Number of times the ingress handler was entered
pub const STAT_INGRESS_HITS: u32 = 0;

/// Number of times the transmit routine was entered
pub const STAT_EGRESS_HITS: u32 = 1;

/// Number of events dropped because the ring buffer was full
pub const STAT_DROPPED_EVENTS: u32 = 2;

/// Total number of statistics counters
pub const MAX_STATS: u32 = 3;
