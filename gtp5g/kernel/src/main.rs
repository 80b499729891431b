//! gtp5g Probe - Kernel Space Program
//!
//! Attaches kprobes to the entry of two gtp5g driver functions and emits one
//! fixed-size event per invocation into a shared ring buffer.
//!
//! ## Architecture
//!
//! ```text
//! gtp5g_handle_skb_ipv4() -> kprobe -> reserve/fill/submit (func_id = 1)
//!                                          |
//! gtp5g_dev_xmit()        -> kprobe -> reserve/fill/submit (func_id = 2)
//!                                          |
//!                                          v
//!                                   EVENTS ring buffer (16 MiB)
//!                                          |
//!                                          v
//! Userspace              -> drain, decode, aggregate, export
//! ```
//!
//! ## Usage
//!
//! This program must be compiled for the bpfel-unknown-none target:
//!
//! ```bash
//! cargo build --release --target=bpfel-unknown-none -p gtp5g-probe-ebpf
//! ```
//!
//! On any other target the binary is empty.

#![cfg_attr(target_arch = "bpf", no_std)]
#![cfg_attr(target_arch = "bpf", no_main)]

#[cfg(not(target_arch = "bpf"))]
fn main() {}

#[cfg(target_arch = "bpf")]
mod handlers;
#[cfg(target_arch = "bpf")]
mod helpers;
#[cfg(target_arch = "bpf")]
mod maps;

// Re-export kprobe functions so they're visible to the loader
#[cfg(target_arch = "bpf")]
pub use handlers::{gtp5g_dev_xmit, gtp5g_handle_skb_ipv4};

// Re-export maps for verification
#[cfg(target_arch = "bpf")]
pub use maps::{EVENTS, STATS};

/// Ring buffer, ktime, pid/tgid and comm helpers are GPL-only.
#[cfg(target_arch = "bpf")]
#[link_section = "license"]
#[no_mangle]
#[used]
static LICENSE: [u8; 4] = *b"GPL\0";

#[cfg(target_arch = "bpf")]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    // The verifier rejects any reachable panic path
    loop {}
}
