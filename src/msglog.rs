//! Durable append-only log of every message sent or received.
//!
//! One line per event: `<ISO-8601 UTC timestamp> ---> <payload>` for sent,
//! `<--- ` for received. Each record is data-synced to disk before the write
//! returns, since the host may lose power at any time.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;

pub struct MessageLog {
    file: File,
}

impl std::fmt::Debug for MessageLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLog").finish_non_exhaustive()
    }
}

impl MessageLog {
    /// Open (creating if necessary) the log at `path` in append mode.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    /// Record an outbound message.
    pub fn sent(&mut self, msg: &str) -> io::Result<()> {
        self.append("--->", msg)
    }

    /// Record an inbound message.
    pub fn received(&mut self, msg: &str) -> io::Result<()> {
        self.append("<---", msg)
    }

    fn append(&mut self, arrow: &str, msg: &str) -> io::Result<()> {
        let ts = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        writeln!(self.file, "{ts} {arrow} {msg}")?;
        self.file.sync_data()
    }
}
