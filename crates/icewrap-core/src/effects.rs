use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::process::{run_command, Capture, RunOutput};

/// Side effects the dispatcher needs from the machine it runs on.
pub trait Effects: Send + Sync {
    /// Resolve a program name (or path) to an absolute executable path.
    fn locate(&self, program: &str) -> Option<PathBuf>;
    fn run(&self, program: &Path, args: &[String], cwd: &Path, capture: Capture)
        -> Result<RunOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEffects;

impl SystemEffects {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Effects for SystemEffects {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        if program.is_empty() {
            return None;
        }
        which::which(program).ok()
    }

    fn run(
        &self,
        program: &Path,
        args: &[String],
        cwd: &Path,
        capture: Capture,
    ) -> Result<RunOutput> {
        run_command(program, args, cwd, capture)
    }
}
