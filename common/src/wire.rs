//! Event wire format
//!
//! Explicit little-endian encoding of [`GtpEvent`], independent of the host's
//! native layout. Decoders written in other languages read the same bytes.

use core::fmt;

use crate::constants::{EVENT_PAYLOAD_LEN, EVENT_RECORD_SIZE, TASK_COMM_LEN};
use crate::types::{CallSite, GtpEvent};

/// Reasons a record cannot be decoded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the event fields occupy
    Truncated { len: usize },
    /// `func_id` is not a known call site
    UnknownCallSite(u32),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { len } => write!(
                f,
                "event record too small: {} bytes, need {}",
                len, EVENT_PAYLOAD_LEN
            ),
            DecodeError::UnknownCallSite(id) => write!(f, "unknown call site id {}", id),
        }
    }
}

#[inline(always)]
fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

#[inline(always)]
fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

#[inline(always)]
fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(raw)
}

impl GtpEvent {
    /// Encode into a full 64-byte record
    pub fn encode(&self) -> [u8; EVENT_RECORD_SIZE] {
        let mut out = [0u8; EVENT_RECORD_SIZE];
        out[0..8].copy_from_slice(&self.ts_ns.to_le_bytes());
        out[8..12].copy_from_slice(&self.cpu.to_le_bytes());
        out[12..16].copy_from_slice(&self.pid.to_le_bytes());
        out[16..20].copy_from_slice(&self.tgid.to_le_bytes());
        out[20..36].copy_from_slice(&self.comm);
        out[36..40].copy_from_slice(&self.src_ip.to_le_bytes());
        out[40..44].copy_from_slice(&self.dst_ip.to_le_bytes());
        out[44..46].copy_from_slice(&self.src_port.to_le_bytes());
        out[46..48].copy_from_slice(&self.dst_port.to_le_bytes());
        out[48..52].copy_from_slice(&self.pkt_len.to_le_bytes());
        out[52..56].copy_from_slice(&self.teid.to_le_bytes());
        out[56..60].copy_from_slice(&self.func_id.to_le_bytes());
        out
    }

    /// Decode a record
    ///
    /// Accepts the 60 field bytes with or without the trailing padding.
    /// Padding content is ignored.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < EVENT_PAYLOAD_LEN {
            return Err(DecodeError::Truncated { len: data.len() });
        }

        let func_id = read_u32(data, 56);
        if CallSite::from_raw(func_id).is_none() {
            return Err(DecodeError::UnknownCallSite(func_id));
        }

        let mut comm = [0u8; TASK_COMM_LEN];
        comm.copy_from_slice(&data[20..36]);

        Ok(Self {
            ts_ns: read_u64(data, 0),
            cpu: read_u32(data, 8),
            pid: read_u32(data, 12),
            tgid: read_u32(data, 16),
            comm,
            src_ip: read_u32(data, 36),
            dst_ip: read_u32(data, 40),
            src_port: read_u16(data, 44),
            dst_port: read_u16(data, 46),
            pkt_len: read_u32(data, 48),
            teid: read_u32(data, 52),
            func_id,
            _padding: 0,
        })
    }
}
