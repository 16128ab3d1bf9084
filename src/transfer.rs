//! Per-file transfer shared by both directions.
//!
//! The byte receiver always speaks first: it sends a start signal, the sender
//! answers with a descriptor followed by exactly `size` raw bytes.
//!
//! `Err` from these functions means the connection is unusable. Problems
//! local to one file come back as [`FileOutcome::Failed`] with the stream
//! still positioned at the next file.

use anyhow::{Context, Result};
use filetime::{set_file_mtime, FileTime};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{CHUNK_SIZE, NAME_CAPACITY};
use crate::protocol_core::{
    base_name, join_under_root, read_packet, write_packet, FileDescriptor, FileStartSignal,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Done { path: PathBuf, bytes: u64 },
    Failed { path: PathBuf, reason: String },
}

impl FileOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, FileOutcome::Done { .. })
    }

    fn failed(path: &Path, reason: impl ToString) -> Self {
        FileOutcome::Failed { path: path.to_path_buf(), reason: reason.to_string() }
    }
}

async fn open_for_send(path: &Path) -> Result<(File, FileDescriptor)> {
    let name = base_name(&path.to_string_lossy()).to_string();
    if name.is_empty() {
        anyhow::bail!("no file name in {}", path.display());
    }
    if name.len() > NAME_CAPACITY {
        anyhow::bail!("file name longer than {} bytes", NAME_CAPACITY);
    }
    let file = File::open(path).await.context("open")?;
    let md = file.metadata().await.context("stat")?;
    if !md.is_file() {
        anyhow::bail!("not a regular file");
    }
    let mtime = FileTime::from_last_modification_time(&md).unix_seconds();
    Ok((file, FileDescriptor { name, size: md.len(), mtime }))
}

/// Wait for the start signal, then send the descriptor and content of `path`.
pub async fn send_file<S>(stream: &mut S, path: &Path) -> Result<FileOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("waiting for start signal");
    let signal: FileStartSignal = read_packet(stream).await.context("receive start signal")?;
    if !signal.start {
        debug!("peer sent start=false, sending anyway");
    }

    let (mut file, desc) = match open_for_send(path).await {
        Ok(v) => v,
        Err(e) => {
            warn!("cannot send {}: {:#}", path.display(), e);
            write_packet(stream, &FileDescriptor::skip()).await.context("send skip descriptor")?;
            return Ok(FileOutcome::failed(path, format!("{:#}", e)));
        }
    };

    debug!("sending {} ({} bytes)", desc.name, desc.size);
    write_packet(stream, &desc).await.context("send file descriptor")?;

    // Exactly desc.size bytes go out. If the file shrinks or a read fails
    // the remainder is zero-filled so the peer stays in step.
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    let mut local_err: Option<String> = None;
    while sent < desc.size {
        let want = (desc.size - sent).min(CHUNK_SIZE as u64) as usize;
        let n = if local_err.is_none() {
            match file.read(&mut buf[..want]).await {
                Ok(0) => {
                    local_err = Some(format!("file shrank to {} bytes", sent));
                    0
                }
                Ok(n) => n,
                Err(e) => {
                    local_err = Some(format!("read failed: {}", e));
                    0
                }
            }
        } else {
            0
        };
        let chunk = if n == 0 {
            buf[..want].fill(0);
            want
        } else {
            n
        };
        stream.write_all(&buf[..chunk]).await.context("send chunk")?;
        sent += chunk as u64;
    }
    stream.flush().await.context("flush")?;

    match local_err {
        Some(reason) => {
            warn!("{}: {}", path.display(), reason);
            Ok(FileOutcome::failed(path, reason))
        }
        None => Ok(FileOutcome::Done { path: path.to_path_buf(), bytes: sent }),
    }
}

/// Discard `size` bytes of content the receiver cannot store.
async fn drain<S>(stream: &mut S, size: u64) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let copied = tokio::io::copy(&mut (&mut *stream).take(size), &mut tokio::io::sink()).await?;
    if copied < size {
        anyhow::bail!("connection closed with {} bytes outstanding", size - copied);
    }
    Ok(())
}

/// Send the start signal, then receive one file into `dest_dir`.
///
/// Only the basename of the peer-supplied name is used. An existing file
/// of that name is overwritten.
pub async fn receive_file<S>(stream: &mut S, dest_dir: &Path) -> Result<FileOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("sending start signal");
    write_packet(stream, &FileStartSignal { start: true })
        .await
        .context("send start signal")?;
    let desc: FileDescriptor = read_packet(stream).await.context("receive file descriptor")?;
    if desc.is_skip() {
        return Ok(FileOutcome::failed(dest_dir, "sender skipped file"));
    }
    debug!("receiving {} ({} bytes)", desc.name, desc.size);

    let target = match join_under_root(dest_dir, &desc.name) {
        Ok(p) => p,
        Err(e) => {
            drain(stream, desc.size).await?;
            return Ok(FileOutcome::failed(dest_dir, format!("{:#}", e)));
        }
    };
    let mut file = match File::create(&target).await {
        Ok(f) => f,
        Err(e) => {
            drain(stream, desc.size).await?;
            return Ok(FileOutcome::failed(&target, format!("create failed: {}", e)));
        }
    };

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = desc.size;
    let mut write_err: Option<std::io::Error> = None;
    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = stream.read(&mut buf[..want]).await.context("receive chunk")?;
        // EOF here leaves nothing for later files to read either, so it ends
        // the session rather than counting as one failed file.
        if n == 0 {
            anyhow::bail!(
                "connection closed with {} of {} bytes outstanding for {}",
                remaining,
                desc.size,
                desc.name
            );
        }
        if write_err.is_none() {
            if let Err(e) = file.write_all(&buf[..n]).await {
                write_err = Some(e);
            }
        }
        remaining -= n as u64;
    }
    if write_err.is_none() {
        if let Err(e) = file.flush().await {
            write_err = Some(e);
        }
    }
    drop(file);

    if let Some(e) = write_err {
        return Ok(FileOutcome::failed(&target, format!("write failed: {}", e)));
    }
    if let Err(e) = set_file_mtime(&target, FileTime::from_unix_time(desc.mtime, 0)) {
        return Ok(FileOutcome::failed(&target, format!("set mtime failed: {}", e)));
    }
    Ok(FileOutcome::Done { path: target, bytes: desc.size })
}

/// Wait for the start signal, then write one newline-terminated line per
/// entry. The end of the stream is the terminator.
pub async fn send_listing<S>(stream: &mut S, entries: &[String]) -> Result<u32>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _signal: FileStartSignal = read_packet(stream).await.context("receive start signal")?;
    let mut sent = 0u32;
    for entry in entries {
        let line = format!("{}\n", entry);
        stream.write_all(line.as_bytes()).await.context("send list entry")?;
        debug!("sent: {}", entry);
        sent += 1;
    }
    stream.flush().await?;
    Ok(sent)
}

/// Send the start signal and read text until the peer closes the stream.
pub async fn receive_listing<S>(stream: &mut S) -> Result<Vec<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_packet(stream, &FileStartSignal { start: true })
        .await
        .context("send start signal")?;
    let mut text = Vec::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = stream.read(&mut buf).await.context("receive list")?;
        if n == 0 {
            break;
        }
        debug!("list chunk: {}", String::from_utf8_lossy(&buf[..n]));
        text.extend_from_slice(&buf[..n]);
    }
    Ok(String::from_utf8_lossy(&text)
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_moves_with_content_and_mtime() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let path = src.path().join("data.bin");
        let content: Vec<u8> = (0..(CHUNK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &content).unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        let (mut a, mut b) = tokio::io::duplex(4096);
        let (sent, received) = tokio::join!(send_file(&mut a, &path), receive_file(&mut b, dst.path()));
        assert!(sent.unwrap().is_done());
        let received = received.unwrap();
        let out = dst.path().join("data.bin");
        assert_eq!(received, FileOutcome::Done { path: out.clone(), bytes: content.len() as u64 });
        assert_eq!(fs::read(&out).unwrap(), content);
        let md = fs::metadata(&out).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&md).unix_seconds(), 1_600_000_000);
    }

    #[tokio::test]
    async fn test_empty_file() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let path = src.path().join("empty.dat");
        fs::write(&path, b"").unwrap();

        let (mut a, mut b) = tokio::io::duplex(256);
        let (sent, received) = tokio::join!(send_file(&mut a, &path), receive_file(&mut b, dst.path()));
        assert!(sent.unwrap().is_done());
        assert!(received.unwrap().is_done());
        assert_eq!(fs::metadata(dst.path().join("empty.dat")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_is_skipped_and_stream_stays_in_step() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let missing = src.path().join("gone.txt");
        let present = src.path().join("here.txt");
        fs::write(&present, b"hello").unwrap();

        let (mut a, mut b) = tokio::io::duplex(256);
        let sender = async {
            let first = send_file(&mut a, &missing).await.unwrap();
            let second = send_file(&mut a, &present).await.unwrap();
            (first, second)
        };
        let receiver = async {
            let first = receive_file(&mut b, dst.path()).await.unwrap();
            let second = receive_file(&mut b, dst.path()).await.unwrap();
            (first, second)
        };
        let ((s1, s2), (r1, r2)) = tokio::join!(sender, receiver);
        assert!(!s1.is_done());
        assert!(!r1.is_done());
        assert!(s2.is_done());
        assert!(r2.is_done());
        assert_eq!(fs::read(dst.path().join("here.txt")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_receiver_strips_traversal_from_name() {
        let dst = TempDir::new().unwrap();
        let (mut a, mut b) = tokio::io::duplex(256);
        let sender = async {
            let _sig: FileStartSignal = read_packet(&mut a).await.unwrap();
            let desc = FileDescriptor { name: "../../evil.txt".into(), size: 3, mtime: 0 };
            write_packet(&mut a, &desc).await.unwrap();
            a.write_all(b"bad").await.unwrap();
        };
        let (_, received) = tokio::join!(sender, receive_file(&mut b, dst.path()));
        let out = dst.path().join("evil.txt");
        assert_eq!(received.unwrap(), FileOutcome::Done { path: out.clone(), bytes: 3 });
        assert_eq!(fs::read(out).unwrap(), b"bad");
    }

    #[tokio::test]
    async fn test_unwritable_target_drains_content() {
        let dst = TempDir::new().unwrap();
        let missing_dir = dst.path().join("no/such/dir");
        let src = TempDir::new().unwrap();
        let a_path = src.path().join("a.txt");
        let b_path = src.path().join("b.txt");
        fs::write(&a_path, vec![7u8; 10_000]).unwrap();
        fs::write(&b_path, b"second").unwrap();

        let (mut a, mut b) = tokio::io::duplex(1024);
        let sender = async {
            send_file(&mut a, &a_path).await.unwrap();
            send_file(&mut a, &b_path).await.unwrap();
        };
        let receiver = async {
            let first = receive_file(&mut b, &missing_dir).await.unwrap();
            let second = receive_file(&mut b, dst.path()).await.unwrap();
            (first, second)
        };
        let (_, (first, second)) = tokio::join!(sender, receiver);
        assert!(!first.is_done());
        assert!(second.is_done());
        assert_eq!(fs::read(dst.path().join("b.txt")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_truncated_stream_is_fatal() {
        let dst = TempDir::new().unwrap();
        let (mut a, mut b) = tokio::io::duplex(256);
        let sender = async move {
            let _sig: FileStartSignal = read_packet(&mut a).await.unwrap();
            let desc = FileDescriptor { name: "short.bin".into(), size: 100, mtime: 0 };
            write_packet(&mut a, &desc).await.unwrap();
            a.write_all(&[1u8; 10]).await.unwrap();
            drop(a);
        };
        let (_, received) = tokio::join!(sender, receive_file(&mut b, dst.path()));
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn test_listing() {
        let entries = vec!["./a.txt".to_string(), "./b.txt".to_string()];
        let (mut a, mut b) = tokio::io::duplex(256);
        let sender = async move {
            let n = send_listing(&mut a, &entries).await.unwrap();
            drop(a);
            n
        };
        let (n, got) = tokio::join!(sender, receive_listing(&mut b));
        assert_eq!(n, 2);
        assert_eq!(got.unwrap(), vec!["./a.txt", "./b.txt"]);
    }
}
