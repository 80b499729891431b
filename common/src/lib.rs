//! Shared types and capture logic for the gtp5g probe
//!
//! This crate provides the event schema, its wire format and the capture
//! handler body shared between the eBPF kernel programs and the userspace
//! consumer.

#![cfg_attr(not(test), no_std)]

pub mod capture;
pub mod constants;
pub mod types;
pub mod wire;

// Re-export commonly used types
pub use capture::{capture, CaptureEnv, CaptureOutcome, EventSink, EventSlot};
pub use constants::*;
pub use types::{comm_from_bytes, split_pid_tgid, CallSite, GtpEvent};
pub use wire::DecodeError;
