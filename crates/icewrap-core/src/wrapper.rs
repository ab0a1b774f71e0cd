//! The `run-icecc` script that pins icecream to a fingerprinted environment.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::deferred::DeferredValue;

pub const WRAPPER_NAME: &str = "run-icecc";

const ICECC_PLACEHOLDER: &str = "@icecc@";
const VERSION_PLACEHOLDER: &str = "@icecc_version@";
const ARCH_PLACEHOLDER: &str = "@icecc_version_arch@";

const DEFAULT_TEMPLATE: &str = "#!/bin/sh\n\
ICECC_VERSION=@icecc_version_arch@@icecc_version@ exec @icecc@ \"$@\"\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperTemplate {
    body: String,
}

impl Default for WrapperTemplate {
    fn default() -> Self {
        Self {
            body: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl WrapperTemplate {
    /// Load a template from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_file(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)
            .with_context(|| format!("failed to read wrapper template {}", path.display()))?;
        Ok(Self { body })
    }

    #[must_use]
    pub fn render(&self, icecc: &Path, icecc_version: &str, arch: Option<&str>) -> String {
        let arch = arch
            .filter(|arch| !arch.is_empty())
            .map(|arch| format!("{arch}:"))
            .unwrap_or_default();
        self.body
            .replace(ICECC_PLACEHOLDER, &icecc.display().to_string())
            .replace(VERSION_PLACEHOLDER, icecc_version)
            .replace(ARCH_PLACEHOLDER, &arch)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WrapperOutcome {
    pub path: PathBuf,
    /// Digest of the pointer file the script was rendered from.
    pub signature: String,
    pub icecc_version: String,
    pub written: bool,
}

/// Render the wrapper to `dest`, rewriting it only when its bytes change.
///
/// # Errors
///
/// Returns an error if the pointer cannot be read or the script cannot be written.
pub fn generate_wrapper(
    template: &WrapperTemplate,
    icecc: &Path,
    pointer: &DeferredValue,
    arch: Option<&str>,
    dest: &Path,
) -> Result<WrapperOutcome> {
    let signature = pointer.signature()?;
    let icecc_version = pointer.realize()?.to_string();
    let script = template.render(icecc, &icecc_version, arch);

    let unchanged = fs::read(dest)
        .map(|existing| existing == script.as_bytes())
        .unwrap_or(false);
    if !unchanged {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, &script).with_context(|| format!("failed to write {}", dest.display()))?;
    }
    make_owner_executable(dest)?;
    debug!(path = %dest.display(), written = !unchanged, "wrapper script ready");

    Ok(WrapperOutcome {
        path: dest.to_path_buf(),
        signature,
        icecc_version,
        written: !unchanged,
    })
}

#[cfg(unix)]
fn make_owner_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o100);
    fs::set_permissions(path, perms)
        .with_context(|| format!("failed to mark {} executable", path.display()))
}

#[cfg(not(unix))]
fn make_owner_executable(_path: &Path) -> Result<()> {
    Ok(())
}
