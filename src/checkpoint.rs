//! Last fully-processed change number, kept as plain text on disk.
//!
//! The value is read once at startup and written once during shutdown.
//! There is no intermediate persistence: an unclean exit loses whatever
//! was processed since the last graceful shutdown.

use crate::error::{RelayError, Result};
use crate::types::ChangeNumber;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default checkpoint file name.
pub const DEFAULT_CHECKPOINT_FILE: &str = "last-changenumber.txt";

/// Plain-text checkpoint file.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted change number, or `0` if none was saved yet.
    pub fn load(&self) -> Result<ChangeNumber> {
        if !self.path.exists() {
            return Ok(ChangeNumber::UNKNOWN);
        }

        let text = fs::read_to_string(&self.path)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(ChangeNumber::UNKNOWN);
        }

        trimmed.parse::<u32>().map(ChangeNumber).map_err(|e| {
            RelayError::InvalidFormat(format!("{:?} in {}: {}", trimmed, self.path.display(), e))
        })
    }

    /// Persist the change number, replacing any previous value.
    pub fn save(&self, change_number: ChangeNumber) -> Result<()> {
        let tmp = self.path.with_extension("tmp");

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(change_number.to_string().as_bytes())?;
        file.sync_all()?;

        fs::rename(&tmp, &self.path)?;

        tracing::info!(
            change_number = %change_number,
            path = %self.path.display(),
            "Saved checkpoint"
        );
        Ok(())
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::new(DEFAULT_CHECKPOINT_FILE)
    }
}
