use std::fs::{OpenOptions, rename, metadata, remove_file, read_dir, create_dir_all};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use crate::protocol::DeadLetter;
use chrono::Utc;

/// Append-only JSONL log of failed projects with size-based rotation.
///
/// Clones share one writer lock, so concurrent jobs never interleave lines or race a rotation.
/// Calls block on file I/O.
#[derive(Debug, Clone)]
pub struct DeadLetterLog {
    path: PathBuf,
    max_bytes: u64,
    max_rotations: u32,
    writer: Arc<Mutex<()>>,
}

impl DeadLetterLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, max_rotations: u32) -> Self {
        Self { path: path.into(), max_bytes, max_rotations, writer: Arc::new(Mutex::new(())) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, entry: &DeadLetter) -> io::Result<()> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        line.push('\n');

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        self.rotate_if_needed()?;
        let mut f = OpenOptions::new().create(true).append(true).open(&self.path)?;
        f.write_all(line.as_bytes())
    }

    fn rotate_if_needed(&self) -> io::Result<()> {
        match metadata(&self.path) {
            Ok(meta) if meta.len() >= self.max_bytes => {
                let ts = Utc::now().format("%Y%m%d-%H%M%S%.9f").to_string();
                let mut rotated = self.path.clone().into_os_string();
                rotated.push(format!(".{}", ts));
                rename(&self.path, PathBuf::from(rotated))?;
                self.prune_rotations()
            }
            _ => Ok(()),
        }
    }

    /// Rotated files sort chronologically by name; the oldest beyond the limit are removed.
    fn prune_rotations(&self) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let base_name = match self.path.file_name() {
            Some(n) => n.to_string_lossy().to_string(),
            None => return Ok(()),
        };
        let prefix = format!("{}.", base_name);

        let mut rotated: Vec<PathBuf> = read_dir(dir)?
            .flatten()
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .map(|name| name.starts_with(&prefix))
                    .unwrap_or(false)
            })
            .map(|e| e.path())
            .collect();
        rotated.sort();

        let excess = rotated.len().saturating_sub(self.max_rotations as usize);
        for oldest in rotated.iter().take(excess) {
            let _ = remove_file(oldest);
        }
        Ok(())
    }
}
