//! Non-blocking line reader over redirected output files
//!
//! The launched process writes into a plain file, so there is no end-of-stream
//! event to wait for. A stream is considered finished once its process is gone
//! and every byte has been handed out; the owning handle supplies the liveness
//! bit for that decision.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Read side of one redirected stream
#[derive(Debug)]
pub struct OutputStream {
    /// Backing file, None when the stream is discarded
    path: Option<PathBuf>,
    /// Opened lazily on first access
    file: Option<File>,
    /// Bytes consumed from the file so far
    offset: u64,
    /// Consumed bytes not yet terminated by a newline
    partial: Vec<u8>,
}

impl OutputStream {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            file: None,
            offset: 0,
            partial: Vec::new(),
        }
    }

    /// A stream with no readable connection
    pub fn discarded() -> Self {
        Self::new(None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_discarded(&self) -> bool {
        self.path.is_none()
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Release the file; a later read reopens it at the same position
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(path = ?self.path, "Closed output stream");
        }
    }

    /// Whether bytes were written that no read has consumed yet
    pub fn can_read(&mut self) -> bool {
        self.unread_bytes() > 0
    }

    /// All complete lines written since the previous read
    ///
    /// Never blocks. An unterminated tail is held back until a later read
    /// completes it, or returned as a final line once `alive` is false and
    /// the file is drained.
    pub fn read_lines(&mut self, alive: bool) -> Vec<String> {
        if let Err(e) = self.fill() {
            warn!(path = ?self.path, error = %e, "Failed to read output stream");
        }

        let mut lines = split_lines(&mut self.partial);
        if !alive && !self.partial.is_empty() && self.unread_bytes() == 0 {
            lines.push(finish_line(std::mem::take(&mut self.partial)));
        }
        lines
    }

    /// Best-effort end of stream: the process is gone and nothing is left
    pub fn is_eof(&mut self, alive: bool) -> bool {
        if self.is_discarded() {
            return true;
        }
        !alive && self.partial.is_empty() && self.unread_bytes() == 0
    }

    fn open(&mut self) -> Option<&mut File> {
        if self.file.is_none() {
            let path = self.path.as_ref()?;
            let mut file = match File::open(path) {
                Ok(file) => file,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Output stream not readable yet");
                    return None;
                }
            };
            // A stream closed early resumes where the last read stopped
            if let Err(e) = file.seek(SeekFrom::Start(self.offset)) {
                debug!(path = %path.display(), error = %e, "Failed to seek output stream");
                return None;
            }
            debug!(path = %path.display(), offset = self.offset, "Opened output stream");
            self.file = Some(file);
        }
        self.file.as_mut()
    }

    fn unread_bytes(&mut self) -> u64 {
        let offset = self.offset;
        self.open()
            .and_then(|file| file.metadata().ok())
            .map_or(0, |meta| meta.len().saturating_sub(offset))
    }

    /// Move everything currently in the file into `partial`
    fn fill(&mut self) -> io::Result<()> {
        let Some(file) = self.open() else {
            return Ok(());
        };
        let mut chunk = Vec::new();
        let read = file.read_to_end(&mut chunk)?;
        self.offset += read as u64;
        self.partial.extend_from_slice(&chunk);
        Ok(())
    }
}

/// Drain every newline-terminated line out of `buffer`
pub(crate) fn split_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let Some(last_newline) = buffer.iter().rposition(|&b| b == b'\n') else {
        return Vec::new();
    };

    let rest = buffer.split_off(last_newline + 1);
    let complete = std::mem::replace(buffer, rest);
    complete[..last_newline]
        .split(|&b| b == b'\n')
        .map(|line| finish_line(line.to_vec()))
        .collect()
}

fn finish_line(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8_lossy(&line).into_owned()
}
