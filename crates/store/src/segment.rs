//! Append-only record log.
//!
//! Every durable fact is one JSON line in a numbered segment file. Writes
//! are flushed and fsynced before they are acknowledged; recovery replays
//! the segments in order and tolerates a torn trailing line from a crash
//! mid-write.

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Serialize, de::DeserializeOwned};

/// Rotate to a fresh segment past this size so no single file grows without
/// bound.
const SEGMENT_ROTATE_BYTES: u64 = 64 * 1024 * 1024;

pub(crate) struct SegmentLog {
    dir: PathBuf,
    prefix: &'static str,
    writer: Mutex<ActiveSegment>,
}

struct ActiveSegment {
    file: File,
    seq: u32,
    written: u64,
}

impl SegmentLog {
    /// Open the log, replaying every existing record into `apply` in write
    /// order.
    pub(crate) fn open<R, F>(dir: &Path, prefix: &'static str, mut apply: F) -> std::io::Result<Self>
    where
        R: DeserializeOwned,
        F: FnMut(R),
    {
        std::fs::create_dir_all(dir)?;

        let mut segments = existing_segments(dir, prefix)?;
        segments.sort();

        for (_, path) in &segments {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<R>(&line) {
                    Ok(record) => apply(record),
                    Err(e) => {
                        // A torn tail from a crash mid-write; everything
                        // before it was fsynced and already applied.
                        log::warn!("skipping unreadable record in {}: {e}", path.display());
                    }
                }
            }
        }

        let seq = segments.last().map(|(seq, _)| *seq).unwrap_or(1);
        let path = segment_path(dir, prefix, seq);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            dir: dir.to_path_buf(),
            prefix,
            writer: Mutex::new(ActiveSegment { file, seq, written }),
        })
    }

    /// Append one record, durable before return.
    pub(crate) fn append<R: Serialize>(&self, record: &R) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let Ok(mut active) = self.writer.lock() else {
            return Err(std::io::Error::other("segment writer poisoned"));
        };

        if active.written >= SEGMENT_ROTATE_BYTES {
            let seq = active.seq + 1;
            let path = segment_path(&self.dir, self.prefix, seq);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            *active = ActiveSegment { file, seq, written: 0 };
        }

        active.file.write_all(&line)?;
        active.file.sync_data()?;
        active.written += line.len() as u64;

        Ok(())
    }
}

fn segment_path(dir: &Path, prefix: &str, seq: u32) -> PathBuf {
    dir.join(format!("{prefix}-{seq:06}.log"))
}

fn existing_segments(dir: &Path, prefix: &str) -> std::io::Result<Vec<(u32, PathBuf)>> {
    let mut segments = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };

        let Some(rest) = name.strip_prefix(prefix).and_then(|s| s.strip_prefix('-')) else {
            continue;
        };
        let Some(seq) = rest.strip_suffix(".log").and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };

        segments.push((seq, entry.path()));
    }

    Ok(segments)
}
