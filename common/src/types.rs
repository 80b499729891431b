//! Shared data structures between kernel and userspace
//!
//! `GtpEvent` is repr(C) so the eBPF program can write it straight into
//! the ring buffer. Its field offsets are pinned to the wire layout below.

use crate::constants::{
    EGRESS_SYMBOL, EVENT_PAYLOAD_LEN, EVENT_RECORD_SIZE, INGRESS_SYMBOL, STAT_EGRESS_HITS,
    STAT_INGRESS_HITS, TASK_COMM_LEN,
};

/// Instrumented execution point that produced an event
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallSite {
    /// Entry of `gtp5g_handle_skb_ipv4`
    Ingress = 1,
    /// Entry of `gtp5g_dev_xmit`
    Egress = 2,
}

impl CallSite {
    /// Both call sites, in identifier order
    pub const ALL: [CallSite; 2] = [CallSite::Ingress, CallSite::Egress];

    /// Map a raw `func_id` back to a call site
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(CallSite::Ingress),
            2 => Some(CallSite::Egress),
            _ => None,
        }
    }

    #[inline(always)]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    /// Kernel symbol the handler for this call site attaches to.
    ///
    /// The eBPF programs are named after the symbol they probe, so this is
    /// also the program name inside the object file.
    pub const fn symbol(self) -> &'static str {
        match self {
            CallSite::Ingress => INGRESS_SYMBOL,
            CallSite::Egress => EGRESS_SYMBOL,
        }
    }

    /// Index of this call site's hit counter in the STATS map
    #[inline(always)]
    pub const fn hit_stat(self) -> u32 {
        match self {
            CallSite::Ingress => STAT_INGRESS_HITS,
            CallSite::Egress => STAT_EGRESS_HITS,
        }
    }
}

/// One observed entry into an instrumented gtp5g function
///
/// Layout (little-endian, 64 bytes):
///
/// ```text
///  0 ts_ns     u64      16 tgid      u32      44 src_port u16     56 func_id  u32
///  8 cpu       u32      20 comm      [u8;16]  46 dst_port u16     60 _padding u32
/// 12 pid       u32      36 src_ip    u32      48 pkt_len  u32
///                       40 dst_ip    u32      52 teid     u32
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GtpEvent {
    /// Monotonic timestamp (nanoseconds, CLOCK_MONOTONIC)
    pub ts_ns: u64,
    /// Logical CPU that ran the handler
    pub cpu: u32,
    /// Thread ID, lower half of pid_tgid
    pub pid: u32,
    /// Process ID, upper half of pid_tgid
    pub tgid: u32,
    /// Task command name, NUL padded
    pub comm: [u8; TASK_COMM_LEN],
    /// Reserved for payload parsing, always 0
    pub src_ip: u32,
    /// Reserved for payload parsing, always 0
    pub dst_ip: u32,
    /// Reserved for payload parsing, always 0
    pub src_port: u16,
    /// Reserved for payload parsing, always 0
    pub dst_port: u16,
    /// Reserved for payload parsing, always 0
    pub pkt_len: u32,
    /// Reserved tunnel endpoint identifier, always 0
    pub teid: u32,
    /// Call site identifier (see [`CallSite`])
    pub func_id: u32,
    /// Padding to a multiple of 8 bytes
    pub _padding: u32,
}

impl GtpEvent {
    /// Build an event for `call_site` with every reserved field zeroed
    #[inline(always)]
    pub fn new(
        call_site: CallSite,
        ts_ns: u64,
        cpu: u32,
        pid_tgid: u64,
        comm: [u8; TASK_COMM_LEN],
    ) -> Self {
        let (pid, tgid) = split_pid_tgid(pid_tgid);
        Self {
            ts_ns,
            cpu,
            pid,
            tgid,
            comm,
            src_ip: 0,
            dst_ip: 0,
            src_port: 0,
            dst_port: 0,
            pkt_len: 0,
            teid: 0,
            func_id: call_site.as_raw(),
            _padding: 0,
        }
    }

    pub fn call_site(&self) -> Option<CallSite> {
        CallSite::from_raw(self.func_id)
    }

    /// Recombine pid and tgid into the kernel's pid_tgid value
    pub fn pid_tgid(&self) -> u64 {
        ((self.tgid as u64) << 32) | self.pid as u64
    }

    /// Command name up to the first NUL byte
    ///
    /// Returns `None` if the name is not valid UTF-8.
    pub fn comm_str(&self) -> Option<&str> {
        let end = self
            .comm
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.comm.len());
        core::str::from_utf8(&self.comm[..end]).ok()
    }
}

/// Split the combined 64-bit identifier into `(pid, tgid)`
#[inline(always)]
pub const fn split_pid_tgid(pid_tgid: u64) -> (u32, u32) {
    (pid_tgid as u32, (pid_tgid >> 32) as u32)
}

/// Fit a task name into exactly `TASK_COMM_LEN` bytes
///
/// Shorter names are NUL padded, longer names are truncated without a
/// terminator.
#[inline(always)]
pub fn comm_from_bytes(name: &[u8]) -> [u8; TASK_COMM_LEN] {
    let mut comm = [0u8; TASK_COMM_LEN];
    let len = if name.len() < TASK_COMM_LEN {
        name.len()
    } else {
        TASK_COMM_LEN
    };
    comm[..len].copy_from_slice(&name[..len]);
    comm
}

// Compile-time layout checks
// These will fail to compile if the struct drifts from the wire format
const _: () = {
    use core::mem::{align_of, offset_of, size_of};

    assert!(size_of::<GtpEvent>() == EVENT_RECORD_SIZE);
    assert!(size_of::<GtpEvent>() % align_of::<GtpEvent>() == 0);
    assert!(offset_of!(GtpEvent, ts_ns) == 0);
    assert!(offset_of!(GtpEvent, cpu) == 8);
    assert!(offset_of!(GtpEvent, pid) == 12);
    assert!(offset_of!(GtpEvent, tgid) == 16);
    assert!(offset_of!(GtpEvent, comm) == 20);
    assert!(offset_of!(GtpEvent, src_ip) == 36);
    assert!(offset_of!(GtpEvent, dst_ip) == 40);
    assert!(offset_of!(GtpEvent, src_port) == 44);
    assert!(offset_of!(GtpEvent, dst_port) == 46);
    assert!(offset_of!(GtpEvent, pkt_len) == 48);
    assert!(offset_of!(GtpEvent, teid) == 52);
    assert!(offset_of!(GtpEvent, func_id) == 56);
    assert!(offset_of!(GtpEvent, _padding) == EVENT_PAYLOAD_LEN);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pid_tgid() {
        let (pid, tgid) = split_pid_tgid(0x0000_0001_0000_04D2);
        assert_eq!(pid, 1234);
        assert_eq!(tgid, 1);

        let (pid, tgid) = split_pid_tgid(u64::MAX);
        assert_eq!(pid, u32::MAX);
        assert_eq!(tgid, u32::MAX);
    }

    #[test]
    fn test_comm_padding_and_truncation() {
        let short = comm_from_bytes(b"nr-gnb");
        assert_eq!(&short[..6], b"nr-gnb");
        assert!(short[6..].iter().all(|&b| b == 0));

        let exact = comm_from_bytes(b"0123456789abcdef");
        assert_eq!(&exact, b"0123456789abcdef");

        let long = comm_from_bytes(b"0123456789abcdefXYZ");
        assert_eq!(&long, b"0123456789abcdef");
    }

    #[test]
    fn test_new_event_zeroes_reserved_fields() {
        let event = GtpEvent::new(
            CallSite::Egress,
            42,
            3,
            0x0000_0007_0000_0009,
            comm_from_bytes(b"upf"),
        );

        assert_eq!(event.func_id, 2);
        assert_eq!(event.call_site(), Some(CallSite::Egress));
        assert_eq!(event.pid, 9);
        assert_eq!(event.tgid, 7);
        assert_eq!(event.pid_tgid(), 0x0000_0007_0000_0009);
        assert_eq!(event.comm_str(), Some("upf"));
        assert_eq!(
            (event.src_ip, event.dst_ip, event.src_port, event.dst_port),
            (0, 0, 0, 0)
        );
        assert_eq!((event.pkt_len, event.teid, event._padding), (0, 0, 0));
    }

    #[test]
    fn test_call_site_identifiers() {
        assert_eq!(CallSite::from_raw(0), None);
        assert_eq!(CallSite::from_raw(3), None);
        for site in CallSite::ALL {
            assert_ne!(site.as_raw(), 0);
            assert_eq!(CallSite::from_raw(site.as_raw()), Some(site));
        }
        assert_eq!(CallSite::Ingress.symbol(), "gtp5g_handle_skb_ipv4");
        assert_eq!(CallSite::Egress.symbol(), "gtp5g_dev_xmit");
    }
}
