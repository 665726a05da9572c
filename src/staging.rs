// Upload Staging - scoped temporary file for an incoming dataset
//
// The staged file lives in the configured upload directory and is deleted
// when the StagedUpload is dropped: after a successful import, after a parse
// failure, or while unwinding.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::dataset::DatasetFormat;

pub struct StagedUpload {
    file: NamedTempFile,
    format: DatasetFormat,
    len: u64,
}

impl StagedUpload {
    /// Reserve a fresh file in `dir` (created if missing) carrying the
    /// format's extension
    pub fn create(dir: &Path, format: DatasetFormat) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;

        let suffix = format!(".{}", format.extension());
        let file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(dir)?;

        debug!(path = %file.path().display(), "staged upload created");
        Ok(StagedUpload {
            file,
            format,
            len: 0,
        })
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.file.write_all(chunk)?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    /// Flush so a reader opening the path sees every byte
    pub fn finish(&mut self) -> std::io::Result<()> {
        self.file.as_file_mut().sync_all()
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn format(&self) -> DatasetFormat {
        self.format
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Delete now and report the error instead of swallowing it in Drop
    pub fn release(self) -> std::io::Result<PathBuf> {
        let path = self.file.path().to_path_buf();
        self.file.close()?;
        debug!(path = %path.display(), "staged upload released");
        Ok(path)
    }
}
