//! Capture handler body
//!
//! The same function runs inside the kprobes and inside the userspace
//! simulator. The environment (clock, CPU, current task) and the transport
//! are supplied by the caller.
//!
//! ```text
//! reserve ──▶ full?  ──yes──▶ Dropped (no retry, no error)
//!                │no
//!                ▼
//!   read clock / cpu / pid_tgid / comm ──▶ fill ──▶ publish ──▶ Published
//! ```

use crate::constants::TASK_COMM_LEN;
use crate::types::{CallSite, GtpEvent};

/// Execution context of the handler
///
/// Every method must be callable from a context that cannot sleep,
/// allocate or take locks.
pub trait CaptureEnv {
    /// Monotonic clock in nanoseconds
    fn ktime_ns(&self) -> u64;
    /// Logical CPU running the handler
    fn cpu_id(&self) -> u32;
    /// Combined identifier, thread ID in the low half and process ID in the high half
    fn pid_tgid(&self) -> u64;
    /// NUL padded command name of the current task
    fn comm(&self) -> [u8; TASK_COMM_LEN];
}

/// Producer side of a transport channel
pub trait EventSink {
    type Slot<'a>: EventSlot
    where
        Self: 'a;

    /// Reserve room for one event without blocking
    ///
    /// Returns `None` when the channel is full.
    fn reserve(&self) -> Option<Self::Slot<'_>>;
}

/// A reserved, not yet visible, record
pub trait EventSlot {
    /// Write the complete event into the slot
    fn fill(&mut self, event: &GtpEvent);

    /// Make the record visible to consumers. One-shot.
    fn publish(self);
}

/// What happened to one handler invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    Published,
    /// The channel was full and the event was discarded
    Dropped,
}

/// Emit one event for an entry into `call_site`
#[inline(always)]
pub fn capture<E, S>(env: &E, sink: &S, call_site: CallSite) -> CaptureOutcome
where
    E: CaptureEnv,
    S: EventSink,
{
    let mut slot = match sink.reserve() {
        Some(slot) => slot,
        None => return CaptureOutcome::Dropped,
    };

    let event = GtpEvent::new(
        call_site,
        env.ktime_ns(),
        env.cpu_id(),
        env.pid_tgid(),
        env.comm(),
    );
    slot.fill(&event);
    slot.publish();

    CaptureOutcome::Published
}
