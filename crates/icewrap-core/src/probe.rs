//! Detect a usable icecream client by asking it for its version banner.

use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
    sync::OnceLock,
};

use pep440_rs::Version;
use tracing::debug;

use crate::effects::Effects;
use crate::errors::ConfigError;
use crate::process::Capture;

/// Oldest client the dispatcher will drive.
pub const MIN_CLIENT_VERSION: &str = "1.1rc2";
/// First client that can preprocess remotely for gcc.
pub const GCC_REMOTE_CPP_VERSION: &str = "1.2";
/// Newest client that still accepts `--addfile dest=source` remapping.
pub const LAST_REMAP_VERSION: &str = "1.1";

const BANNER_PREFIX: &str = "ICECC ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientVersion {
    pub path: PathBuf,
    pub version: Version,
}

pub fn default_min_version() -> Version {
    static DEFAULT: OnceLock<Version> = OnceLock::new();
    DEFAULT
        .get_or_init(|| Version::from_str(MIN_CLIENT_VERSION).expect("valid builtin version"))
        .clone()
}

/// Parse a user-supplied version threshold.
///
/// # Errors
///
/// Returns [`ConfigError::BadVersion`] when the string is not a PEP 440 version.
pub fn parse_version(value: &str) -> Result<Version, ConfigError> {
    Version::from_str(value.trim()).map_err(|_| ConfigError::BadVersion {
        value: value.to_string(),
    })
}

pub(crate) fn builtin_version(value: &'static str) -> Version {
    Version::from_str(value).expect("valid builtin version")
}

/// Ask `icecc` for its version. Any failure means "not installed".
pub fn probe_client(effects: &dyn Effects, icecc: &str, min: &Version) -> Option<ClientVersion> {
    let Some(path) = effects.locate(icecc) else {
        debug!(%icecc, "icecream client not found");
        return None;
    };
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    let output = match effects.run(&path, &["--version".to_string()], &cwd, Capture::StdoutOnly) {
        Ok(output) => output,
        Err(err) => {
            debug!(path = %path.display(), %err, "icecream version query failed to start");
            return None;
        }
    };
    if !output.success() {
        debug!(path = %path.display(), code = output.code, "icecream version query failed");
        return None;
    }
    let version = parse_banner(&output.stdout, min)?;
    debug!(path = %path.display(), %version, "icecream client validated");
    Some(ClientVersion { path, version })
}

/// Scan `--version` output for an `ICECC <version>` banner at least `min`.
#[must_use]
pub fn parse_banner(stdout: &str, min: &Version) -> Option<Version> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix(BANNER_PREFIX))
        .filter_map(|rest| Version::from_str(rest.trim()).ok())
        .find(|version| version >= min)
}

pub(crate) fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
