//! Heartbeat datagram codec.
//!
//! ```text
//! ┌──────────────┬────────────┬──────────┬───────┬────────────┬─────┐
//! │ meta (1 byte)│ len (u32BE)│ hostname │ len=4 │ pid (i32BE)│ ... │
//! └──────────────┴────────────┴──────────┴───────┴────────────┴─────┘
//! meta = version << 4 | argc, then one length-prefixed blob per argument.
//! The third blob is the timestamp, an f64BE of epoch milliseconds.
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, Result};

/// Frame format version.
pub const FRAME_VERSION: u8 = 1;

/// Arguments in a heartbeat frame.
const HEARTBEAT_ARGS: usize = 3;

/// Encodes blobs as one frame.
///
/// # Errors
/// Returns an error for more than 15 blobs or a blob over `u32::MAX` bytes.
pub fn encode_frame(args: &[&[u8]]) -> Result<Vec<u8>> {
    if args.len() > 0x0f {
        return Err(DiscoveryError::malformed(format!("{} arguments do not fit a frame", args.len())));
    }
    let size = 1 + args.iter().map(|a| 4 + a.len()).sum::<usize>();
    let mut frame = Vec::with_capacity(size);
    frame.push((FRAME_VERSION << 4) | args.len() as u8);
    for arg in args {
        let len = u32::try_from(arg.len())
            .map_err(|_| DiscoveryError::malformed("argument too large"))?;
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(arg);
    }
    Ok(frame)
}

/// Splits a frame into its blobs.
///
/// # Errors
/// Returns an error for a wrong version or a truncated frame.
pub fn decode_frame(frame: &[u8]) -> Result<Vec<&[u8]>> {
    let (&meta, mut rest) = frame
        .split_first()
        .ok_or_else(|| DiscoveryError::malformed("empty frame"))?;
    let version = meta >> 4;
    if version != FRAME_VERSION {
        return Err(DiscoveryError::malformed(format!("unsupported frame version {version}")));
    }
    let argc = usize::from(meta & 0x0f);
    let mut args = Vec::with_capacity(argc);
    for i in 0..argc {
        let (len, tail) = rest
            .split_first_chunk::<4>()
            .ok_or_else(|| DiscoveryError::malformed(format!("argument {i}: truncated length")))?;
        let len = u32::from_be_bytes(*len) as usize;
        if tail.len() < len {
            return Err(DiscoveryError::malformed(format!(
                "argument {i}: need {len} bytes, have {}",
                tail.len()
            )));
        }
        let (arg, tail) = tail.split_at(len);
        args.push(arg);
        rest = tail;
    }
    Ok(args)
}

/// One supervisor announcing itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Sending host.
    pub hostname: String,
    /// Sending supervisor's PID.
    pub pid: i32,
    /// Send time, epoch milliseconds.
    pub timestamp: f64,
}

impl Heartbeat {
    /// Creates a heartbeat stamped now.
    #[must_use]
    pub fn new(hostname: impl Into<String>, pid: i32) -> Self {
        Self {
            hostname: hostname.into(),
            pid,
            timestamp: now_millis(),
        }
    }

    /// Peer key, `hostname:pid`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.hostname, self.pid)
    }

    /// Encodes the datagram.
    ///
    /// # Errors
    /// Returns an error if the hostname does not fit a frame.
    pub fn to_packet(&self) -> Result<Vec<u8>> {
        encode_frame(&[
            self.hostname.as_bytes(),
            self.pid.to_be_bytes().as_slice(),
            self.timestamp.to_be_bytes().as_slice(),
        ])
    }

    /// Decodes a datagram.
    ///
    /// # Errors
    /// Returns an error if the packet is not a heartbeat.
    pub fn from_packet(packet: &[u8]) -> Result<Self> {
        let args = decode_frame(packet)?;
        if args.len() != HEARTBEAT_ARGS {
            return Err(DiscoveryError::malformed(format!(
                "expected {HEARTBEAT_ARGS} arguments, got {}",
                args.len()
            )));
        }
        let hostname = std::str::from_utf8(args[0])
            .map_err(|e| DiscoveryError::malformed(format!("hostname: {e}")))?
            .to_string();
        let pid: [u8; 4] = args[1]
            .try_into()
            .map_err(|_| DiscoveryError::malformed("pid is not 4 bytes"))?;
        let timestamp: [u8; 8] = args[2]
            .try_into()
            .map_err(|_| DiscoveryError::malformed("timestamp is not 8 bytes"))?;
        Ok(Self {
            hostname,
            pid: i32::from_be_bytes(pid),
            timestamp: f64::from_be_bytes(timestamp),
        })
    }
}

/// Epoch milliseconds.
#[must_use]
pub fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64() * 1000.0)
}
