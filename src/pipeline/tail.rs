//! Asynchronous JSONL tail reader with file rotation detection

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

pub struct TailReader {
    path: PathBuf,
    file: Option<BufReader<File>>,
    inode: Option<u64>,
    /// File offset where `pending` starts
    position: u64,
    /// Partial line still waiting for its newline
    pending: Vec<u8>,
    poll_interval: Duration,
}

impl TailReader {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            inode: None,
            position: 0,
            pending: Vec::new(),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Start tailing the file (seeks to end, existing lines are not replayed)
    pub async fn start(&mut self) -> std::io::Result<()> {
        self.open(SeekFrom::End(0)).await?;
        log::info!("📖 Started tailing: {}", self.path.display());
        Ok(())
    }

    /// Read the next complete, non-empty line, waiting if necessary
    ///
    /// Cancel safe: bytes of an unfinished line are kept for the next call.
    pub async fn read_line(&mut self) -> std::io::Result<String> {
        loop {
            if self.detect_rotation().await? {
                log::info!("🔄 File rotation detected, reopening: {}", self.path.display());
                // A rotated file is new content, read it from the top
                self.open(SeekFrom::Start(0)).await?;
            }

            let reader = self.file.as_mut().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "File not opened")
            })?;

            // Bytes land in `pending` even if this future is dropped mid-read
            let read = reader.read_until(b'\n', &mut self.pending).await?;

            if read == 0 || self.pending.last() != Some(&b'\n') {
                // No new data, or writer is mid-line
                sleep(self.poll_interval).await;
                continue;
            }

            self.position += self.pending.len() as u64;
            let line = String::from_utf8_lossy(&self.pending).trim().to_string();
            self.pending.clear();
            if !line.is_empty() {
                return Ok(line);
            }
        }
    }

    async fn open(&mut self, from: SeekFrom) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;

        #[cfg(unix)]
        {
            self.inode = Some(file.metadata().await?.ino());
        }

        let mut reader = BufReader::new(file);
        self.position = reader.seek(from).await?;
        self.pending.clear();
        self.file = Some(reader);
        Ok(())
    }

    /// Detect if the file has been rotated (inode changed) or truncated
    async fn detect_rotation(&self) -> std::io::Result<bool> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            // Mid-rotation: old file moved away, new one not created yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        #[cfg(unix)]
        {
            if self.inode.map_or(false, |old| old != metadata.ino()) {
                return Ok(true);
            }
        }

        Ok(metadata.len() < self.consumed())
    }

    /// Bytes read from the current file, including an unfinished line
    fn consumed(&self) -> u64 {
        self.position + self.pending.len() as u64
    }
}
