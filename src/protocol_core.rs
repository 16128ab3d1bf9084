//! Wire codec shared by the client and server sessions
//!
//! Every packet has a fixed byte layout with explicit little-endian
//! integers, so peers do not depend on each other's struct packing:
//!
//! ```text
//! InitiationRequest  (520) command u32 | pattern [u8; 512] | total_files u32
//! InitiationReply      (8) proceed u8 | pad [u8; 3] | total_files u32
//! FileStartSignal      (1) start u8
//! FileDescriptor     (144) name [u8; 128] | size u64 | mtime i64
//! ```
//!
//! Text fields are zero-padded to their capacity and never length-prefixed.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{packet_len, Command, NAME_CAPACITY, PATTERN_CAPACITY};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("packet length mismatch: expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },

    #[error("unknown command value {0}")]
    UnknownCommand(u32),

    #[error("text of {len} bytes exceeds field capacity {capacity}")]
    TextTooLong { len: usize, capacity: usize },

    #[error("text contains NUL byte")]
    InteriorNul,

    #[error("text field is not valid UTF-8")]
    InvalidUtf8,
}

/// A fixed-size packet with an explicit encoding.
pub trait Packet: Sized {
    const LEN: usize;
    fn encode(&self) -> Result<Vec<u8>, WireError>;
    fn decode(buf: &[u8]) -> Result<Self, WireError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiationRequest {
    pub command: Command,
    pub pattern: String,
    /// Meaningful only for PUSH: number of locally resolved files.
    pub total_files: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitiationReply {
    pub proceed: bool,
    pub total_files: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStartSignal {
    pub start: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Basename only.
    pub name: String,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub mtime: i64,
}

impl FileDescriptor {
    /// Descriptor sent in place of a file the sender could not open.
    /// Keeps both peers in step; the receiver counts it as a failed file.
    pub fn skip() -> Self {
        Self { name: String::new(), size: 0, mtime: 0 }
    }

    pub fn is_skip(&self) -> bool {
        self.name.is_empty()
    }
}

fn check_len(buf: &[u8], expected: usize) -> Result<(), WireError> {
    if buf.len() != expected {
        return Err(WireError::Length { expected, got: buf.len() });
    }
    Ok(())
}

fn u32_at(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn u64_at(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

/// Append `text` zero-padded to `capacity` bytes.
/// Text that fills the field exactly carries no terminator.
pub fn put_text(out: &mut Vec<u8>, text: &str, capacity: usize) -> Result<(), WireError> {
    let bytes = text.as_bytes();
    if bytes.len() > capacity {
        return Err(WireError::TextTooLong { len: bytes.len(), capacity });
    }
    if bytes.contains(&0) {
        return Err(WireError::InteriorNul);
    }
    out.extend_from_slice(bytes);
    out.resize(out.len() + capacity - bytes.len(), 0);
    Ok(())
}

/// Read a zero-padded text field: everything up to the first NUL.
pub fn get_text(field: &[u8]) -> Result<String, WireError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end])
        .map(str::to_owned)
        .map_err(|_| WireError::InvalidUtf8)
}

impl Packet for InitiationRequest {
    const LEN: usize = packet_len::INIT_REQUEST;

    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(&self.command.to_wire().to_le_bytes());
        put_text(&mut out, &self.pattern, PATTERN_CAPACITY)?;
        out.extend_from_slice(&self.total_files.to_le_bytes());
        Ok(out)
    }

    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        check_len(buf, Self::LEN)?;
        let raw = u32_at(buf, 0);
        let command = Command::from_wire(raw).ok_or(WireError::UnknownCommand(raw))?;
        let pattern = get_text(&buf[4..4 + PATTERN_CAPACITY])?;
        let total_files = u32_at(buf, 4 + PATTERN_CAPACITY);
        Ok(Self { command, pattern, total_files })
    }
}

impl Packet for InitiationReply {
    const LEN: usize = packet_len::INIT_REPLY;

    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = vec![0u8; Self::LEN];
        out[0] = self.proceed as u8;
        out[4..8].copy_from_slice(&self.total_files.to_le_bytes());
        Ok(out)
    }

    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        check_len(buf, Self::LEN)?;
        Ok(Self { proceed: buf[0] != 0, total_files: u32_at(buf, 4) })
    }
}

impl Packet for FileStartSignal {
    const LEN: usize = packet_len::START_SIGNAL;

    fn encode(&self) -> Result<Vec<u8>, WireError> {
        Ok(vec![self.start as u8])
    }

    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        check_len(buf, Self::LEN)?;
        Ok(Self { start: buf[0] != 0 })
    }
}

impl Packet for FileDescriptor {
    const LEN: usize = packet_len::FILE_DESCRIPTOR;

    fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(Self::LEN);
        put_text(&mut out, &self.name, NAME_CAPACITY)?;
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.mtime.to_le_bytes());
        Ok(out)
    }

    fn decode(buf: &[u8]) -> Result<Self, WireError> {
        check_len(buf, Self::LEN)?;
        let name = get_text(&buf[..NAME_CAPACITY])?;
        let size = u64_at(buf, NAME_CAPACITY);
        let mtime = u64_at(buf, NAME_CAPACITY + 8) as i64;
        Ok(Self { name, size, mtime })
    }
}

/// Encode and write one packet.
pub async fn write_packet<S, P>(stream: &mut S, packet: &P) -> Result<()>
where
    S: AsyncWrite + Unpin,
    P: Packet,
{
    let bytes = packet.encode()?;
    stream.write_all(&bytes).await?;
    Ok(())
}

/// Read exactly one packet; a short read is an error.
pub async fn read_packet<S, P>(stream: &mut S) -> Result<P>
where
    S: AsyncRead + Unpin,
    P: Packet,
{
    let mut buf = vec![0u8; P::LEN];
    stream
        .read_exact(&mut buf)
        .await
        .with_context(|| format!("short read of {}-byte packet", P::LEN))?;
    Ok(P::decode(&buf)?)
}

/// Last path segment, split on either separator. Paths without a
/// separator are returned unchanged.
pub fn base_name(path: &str) -> &str {
    match path.rfind(&['/', '\\'][..]) {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// Join a peer-supplied file name under `root`, keeping only its basename.
/// Rejects names that reduce to nothing, `.`/`..`, or contain NUL.
pub fn join_under_root(root: &Path, name: &str) -> Result<PathBuf> {
    if name.contains('\0') {
        anyhow::bail!("file name contains NUL byte");
    }
    let base = base_name(name);
    if base.is_empty() || base == "." || base == ".." {
        anyhow::bail!("file name {:?} has no usable basename", name);
    }
    #[cfg(windows)]
    if base.contains(':') {
        anyhow::bail!("file name contains colon (potential ADS attack)");
    }
    Ok(root.join(base))
}

/// Create directory with parent creation
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("create directory {}", path.display()))?;
    }
    Ok(())
}
