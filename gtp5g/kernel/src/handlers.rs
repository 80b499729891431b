//! Kprobe handlers for gtp5g call-site tracking
//!
//! One program per instrumented driver function. Both always return 0 so
//! the probed function behaves exactly as without instrumentation.

use aya_ebpf::{macros::kprobe, programs::ProbeContext};
use gtp5g_common::{capture, constants::*, CallSite, CaptureOutcome};

use crate::{
    helpers::{increment_stat, KprobeEnv, RingSink},
    maps::EVENTS,
};

/// Track GTP-U ingress processing
///
/// Attached to: gtp5g_handle_skb_ipv4
#[kprobe]
pub fn gtp5g_handle_skb_ipv4(_ctx: ProbeContext) -> u32 {
    record_entry(CallSite::Ingress)
}

/// Track gtp5g device transmit
///
/// Attached to: gtp5g_dev_xmit
#[kprobe]
pub fn gtp5g_dev_xmit(_ctx: ProbeContext) -> u32 {
    record_entry(CallSite::Egress)
}

// Arguments are not inspected, so payload fields stay zero.
#[inline(always)]
fn record_entry(call_site: CallSite) -> u32 {
    increment_stat(call_site.hit_stat());

    if capture(&KprobeEnv, &RingSink(&EVENTS), call_site) == CaptureOutcome::Dropped {
        increment_stat(STAT_DROPPED_EVENTS);
    }

    0
}
