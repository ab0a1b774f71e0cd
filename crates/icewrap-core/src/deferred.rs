use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result};

/// A value read from a file only when somebody asks for it.
///
/// `signature` answers "has this changed" from the file's bytes; `realize`
/// returns the value itself. Change detection never looks at the value's
/// producer, only at what it produced.
#[derive(Debug)]
pub struct DeferredValue {
    source: PathBuf,
    realized: OnceLock<String>,
}

impl DeferredValue {
    #[must_use]
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            realized: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Content digest of the backing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn signature(&self) -> Result<String> {
        let bytes = fs::read(&self.source)
            .with_context(|| format!("failed to read {}", self.source.display()))?;
        Ok(icewrap_store::sha256_hex(&bytes))
    }

    /// The file's contents without the trailing newline, read once.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read on first access.
    pub fn realize(&self) -> Result<&str> {
        if let Some(value) = self.realized.get() {
            return Ok(value.as_str());
        }
        let contents = fs::read_to_string(&self.source)
            .with_context(|| format!("failed to read {}", self.source.display()))?;
        let value = contents.trim_end_matches(['\n', '\r']).to_string();
        Ok(self.realized.get_or_init(|| value).as_str())
    }
}
