//! Helper functions for eBPF programs
//!
//! Binds the shared capture logic to BPF helpers and the EVENTS ring buffer.

use aya_ebpf::{
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_smp_processor_id,
        bpf_ktime_get_ns,
    },
    maps::{ring_buf::RingBufEntry, RingBuf},
};
use gtp5g_common::{constants::TASK_COMM_LEN, CaptureEnv, EventSink, EventSlot, GtpEvent};

use crate::maps::STATS;

/// Current task as seen from a kprobe
pub struct KprobeEnv;

impl CaptureEnv for KprobeEnv {
    #[inline(always)]
    fn ktime_ns(&self) -> u64 {
        unsafe { bpf_ktime_get_ns() }
    }

    #[inline(always)]
    fn cpu_id(&self) -> u32 {
        unsafe { bpf_get_smp_processor_id() }
    }

    #[inline(always)]
    fn pid_tgid(&self) -> u64 {
        unsafe { bpf_get_current_pid_tgid() }
    }

    #[inline(always)]
    fn comm(&self) -> [u8; TASK_COMM_LEN] {
        bpf_get_current_comm().unwrap_or([0u8; TASK_COMM_LEN])
    }
}

/// Producer handle on a kernel ring buffer map
pub struct RingSink(pub &'static RingBuf);

/// Reserved ring buffer record
pub struct RingSlot(RingBufEntry<GtpEvent>);

impl EventSink for RingSink {
    type Slot<'a> = RingSlot;

    #[inline(always)]
    fn reserve(&self) -> Option<RingSlot> {
        self.0.reserve::<GtpEvent>(0).map(RingSlot)
    }
}

impl EventSlot for RingSlot {
    #[inline(always)]
    fn fill(&mut self, event: &GtpEvent) {
        self.0.write(*event);
    }

    #[inline(always)]
    fn publish(self) {
        self.0.submit(0);
    }
}

/// Increment a statistics counter
///
/// Each CPU owns its slot, so a plain add cannot race with another CPU.
#[inline(always)]
pub fn increment_stat(stat_id: u32) {
    if let Some(count) = STATS.get_ptr_mut(stat_id) {
        unsafe { *count += 1 };
    }
}
