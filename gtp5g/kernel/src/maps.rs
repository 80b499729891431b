//! BPF map definitions for the gtp5g probe
//!
//! Defines the maps shared with the userspace consumer.

use aya_ebpf::{
    macros::map,
    maps::{PerCpuArray, RingBuf},
};
use gtp5g_common::constants::*;

/// Ring buffer carrying `GtpEvent` records to userspace
///
/// Shared by all CPUs. Reservation fails instead of waiting when the
/// consumer falls behind.
#[map]
pub static EVENTS: RingBuf = RingBuf::with_byte_size(RINGBUF_BYTE_SIZE, 0);

/// Producer-side statistics
///
/// Index: stat_id (see STAT_* constants)
/// Value: u64 counter, one slot per CPU
#[map]
pub static STATS: PerCpuArray<u64> = PerCpuArray::with_max_entries(MAX_STATS, 0);
