use pep440_rs::Version;
use serde::Serialize;

use super::host::{HostChanges, HostEnv};
use crate::errors::ConfigError;
use crate::probe::{builtin_version, GCC_REMOTE_CPP_VERSION};
use crate::toolchain::CompilerFamily;

const DIRECTIVES_ONLY: &str = "-fdirectives-only";

/// Who preprocesses a translation unit before it is shipped to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessMode {
    /// clang: icecream preprocesses remotely.
    ClangRemote,
    /// gcc on a client without remote cpp: preprocess locally, never fall back to serial local builds.
    GccLocalNoFallback,
    /// gcc with the object cache in front: the cache owns preprocessing.
    ObjectCacheOwned,
    /// gcc on a capable client: icecream preprocesses remotely.
    GccRemote,
}

/// Decide once, at setup, who preprocesses.
///
/// # Errors
///
/// Returns [`ConfigError::UnsupportedCompiler`] for compilers other than clang and gcc.
pub fn select_preprocess_mode(
    family: &CompilerFamily,
    client: &Version,
    object_cache_active: bool,
) -> Result<PreprocessMode, ConfigError> {
    match family {
        CompilerFamily::Clang => Ok(PreprocessMode::ClangRemote),
        CompilerFamily::Gcc if *client < builtin_version(GCC_REMOTE_CPP_VERSION) => {
            Ok(PreprocessMode::GccLocalNoFallback)
        }
        CompilerFamily::Gcc if object_cache_active => Ok(PreprocessMode::ObjectCacheOwned),
        CompilerFamily::Gcc => Ok(PreprocessMode::GccRemote),
        CompilerFamily::Other(name) => Err(ConfigError::UnsupportedCompiler {
            compiler: name.clone(),
        }),
    }
}

impl PreprocessMode {
    pub fn apply(self, host: &mut HostEnv, changes: &mut HostChanges) {
        match self {
            Self::ClangRemote => set_env(host, changes, "ICECC_CLANG_REMOTE_CPP", "1"),
            Self::GccLocalNoFallback => set_env(host, changes, "ICECC_CARET_WORKAROUND", "0"),
            Self::ObjectCacheOwned => {
                // The cache would pass -fdirectives-only to its own preprocessor
                // run but not to the compiler; icecream drops it when no remote
                // host is found. Both together break builds.
                if host.env.remove("CCACHE_NOCPP2").is_some() {
                    changes.env_removed.push("CCACHE_NOCPP2".to_string());
                }
                set_env(host, changes, "CCACHE_CPP2", "1");
                let before = host.ccflags.len();
                host.ccflags.retain(|flag| flag != DIRECTIVES_ONLY);
                if host.ccflags.len() != before {
                    changes.ccflags_removed.push(DIRECTIVES_ONLY.to_string());
                }
            }
            Self::GccRemote => set_env(host, changes, "ICECC_REMOTE_CPP", "1"),
        }
    }
}

pub(crate) fn set_env(host: &mut HostEnv, changes: &mut HostChanges, key: &str, value: &str) {
    host.env.insert(key.to_string(), value.to_string());
    changes.env_set.insert(key.to_string(), value.to_string());
}
