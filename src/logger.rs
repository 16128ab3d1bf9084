use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::protocol::Command;

/// Per-file transfer events, independent of the `log` output.
pub trait TransferLogger: Send + Sync {
    fn session(&self, _peer: Option<SocketAddr>, _command: Command, _pattern: &str) {}
    fn file_done(&self, _path: &Path, _bytes: u64) {}
    fn file_failed(&self, _path: &Path, _msg: &str) {}
    fn done(&self, _files: u32, _total: u32) {}
}

pub type SharedLogger = Arc<dyn TransferLogger>;

pub struct NoopLogger;
impl TransferLogger for NoopLogger {}

pub fn noop() -> SharedLogger {
    Arc::new(NoopLogger)
}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl TransferLogger for TextLogger {
    fn session(&self, peer: Option<SocketAddr>, command: Command, pattern: &str) {
        match peer {
            Some(p) => self.line(&format!("SESSION peer={} cmd={} pattern={}", p, command, pattern)),
            None => self.line(&format!("SESSION cmd={} pattern={}", command, pattern)),
        }
    }
    fn file_done(&self, path: &Path, bytes: u64) {
        self.line(&format!("FILE path={} bytes={}", path.display(), bytes));
    }
    fn file_failed(&self, path: &Path, msg: &str) {
        self.line(&format!("FAIL path={} msg={}", path.display(), msg));
    }
    fn done(&self, files: u32, total: u32) {
        self.line(&format!("DONE files={files} total={total}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_logger_writes_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs/transfer.log");
        let logger = TextLogger::new(&path).unwrap();
        logger.session(None, Command::Pull, "*.txt");
        logger.file_done(Path::new("a.txt"), 12);
        logger.file_failed(Path::new("b.txt"), "denied");
        logger.done(1, 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("SESSION cmd=PULL pattern=*.txt"));
        assert!(lines[1].ends_with("FILE path=a.txt bytes=12"));
        assert!(lines[2].ends_with("FAIL path=b.txt msg=denied"));
        assert!(lines[3].ends_with("DONE files=1 total=2"));
    }
}
