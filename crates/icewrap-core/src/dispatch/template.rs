use std::{
    mem,
    path::{Path, PathBuf},
};

use serde::Serialize;

/// Targets whose path contains this marker are configuration probes and always build locally.
pub const CONFTEST_MARKER: &str = "conftest";

#[must_use]
pub fn is_probe_target(target: &Path) -> bool {
    target.to_string_lossy().contains(CONFTEST_MARKER)
}

/// A launcher placed in front of a command. Prefixes never count towards the
/// command's signature, so toggling dispatch does not force rebuilds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prefix {
    /// Route through the wrapper script, except for configuration probes.
    RemoteCompile { wrapper: PathBuf },
    /// Route through the local concurrency limiter.
    Throttle { icerun: PathBuf },
}

impl Prefix {
    fn render(&self, target: &Path) -> Option<String> {
        match self {
            Self::RemoteCompile { wrapper } => {
                (!is_probe_target(target)).then(|| wrapper.display().to_string())
            }
            Self::Throttle { icerun } => Some(icerun.display().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandTemplate {
    prefixes: Vec<Prefix>,
    base: String,
}

impl CommandTemplate {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            prefixes: Vec::new(),
            base: base.into(),
        }
    }

    /// Put `prefix` in front of everything already there.
    pub fn prepend(&mut self, prefix: Prefix) {
        self.prefixes.insert(0, prefix);
    }

    #[must_use]
    pub fn prefixes(&self) -> &[Prefix] {
        &self.prefixes
    }

    #[must_use]
    pub fn has_prefix(&self, prefix: &Prefix) -> bool {
        self.prefixes.contains(prefix)
    }

    /// Put `prefix` in front, replacing any launcher of the same kind.
    /// Returns `false` when `prefix` was already installed.
    pub fn install_prefix(&mut self, prefix: Prefix) -> bool {
        if self.has_prefix(&prefix) {
            return false;
        }
        self.prefixes
            .retain(|existing| mem::discriminant(existing) != mem::discriminant(&prefix));
        self.prepend(prefix);
        true
    }

    /// The part of the command that decides whether its output is stale.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.base
    }

    /// The full command line for building `target`.
    #[must_use]
    pub fn render(&self, target: &Path) -> String {
        let mut parts: Vec<String> = self
            .prefixes
            .iter()
            .filter_map(|prefix| prefix.render(target))
            .collect();
        parts.push(self.base.clone());
        parts.join(" ")
    }
}
