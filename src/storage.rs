use lazy_static::lazy_static;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

lazy_static! {
    static ref UNSAFE_FILENAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9._-]").unwrap();
}

const OUTPUT_EXTENSION: &str = "mp4";
pub const DOWNLOADS_PREFIX: &str = "/downloads";

/// Reduces a client-supplied file name to a single safe path component.
pub fn sanitize_filename(name: &str) -> String {
    // Browsers on Windows may send the full client path
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(base, "_");
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// The upload directory. Stored uploads and rendered outputs share it so both are downloadable.
#[derive(Debug, Clone)]
pub struct UploadStorage {
    base_dir: PathBuf,
}

impl UploadStorage {
    pub async fn open(base_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn object_path(&self, project_id: Uuid, original_name: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}_{}", project_id, sanitize_filename(original_name)))
    }

    pub async fn create(&self, project_id: Uuid, original_name: &str) -> io::Result<UploadSink> {
        let path = self.object_path(project_id, original_name);
        let file = File::create(&path).await?;
        Ok(UploadSink { file, path, written: 0 })
    }

    /// Confirms the stored upload is still a regular file and returns its size.
    pub async fn inspect(&self, path: &Path) -> io::Result<u64> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(meta.len())
    }

    /// Writes the placeholder render artifact next to the upload and returns it with its download URL.
    pub async fn render_output(&self, path: &Path) -> io::Result<(PathBuf, String)> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "upload path has no file name"))?;
        let output_name = format!("{}.{}", file_name, OUTPUT_EXTENSION);
        let output_path = self.base_dir.join(&output_name);
        tokio::fs::copy(path, &output_path).await?;
        Ok((output_path, format!("{}/{}", DOWNLOADS_PREFIX, output_name)))
    }

    pub async fn discard(&self, path: &Path) {
        let _ = tokio::fs::remove_file(path).await;
    }
}

/// Streaming writer for one incoming upload.
#[derive(Debug)]
pub struct UploadSink {
    file: File,
    path: PathBuf,
    written: u64,
}

impl UploadSink {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    pub async fn finish(mut self) -> io::Result<StoredUpload> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(StoredUpload { path: self.path, size: self.written })
    }

    pub async fn abort(self) {
        drop(self.file);
        let _ = tokio::fs::remove_file(&self.path).await;
    }
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub size: u64,
}
