use std::{fmt, path::PathBuf, sync::Arc};

use serde::{Serialize, Serializer};

use super::template::is_probe_target;

/// What a builder will produce, from what, and what else it waits on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Emission {
    pub targets: Vec<PathBuf>,
    pub sources: Vec<PathBuf>,
    pub dependencies: Vec<PathBuf>,
}

impl Emission {
    pub fn new(targets: Vec<PathBuf>, sources: Vec<PathBuf>) -> Self {
        Self {
            targets,
            sources,
            dependencies: Vec::new(),
        }
    }
}

/// One stage of an emitter chain. Each stage receives what the previous one produced.
pub trait Emitter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn emit(&self, emission: Emission) -> Emission;

    /// Two stages with the same name and identity behave identically.
    fn identity(&self) -> String {
        self.name().to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmitterChain {
    stages: Vec<Arc<dyn Emitter>>,
}

impl EmitterChain {
    pub fn push(&mut self, stage: Arc<dyn Emitter>) {
        self.stages.push(stage);
    }

    /// Swap in `stage` for the stage of the same name, or append it.
    /// Returns `false` when an identical stage is already present.
    pub fn install(&mut self, stage: Arc<dyn Emitter>) -> bool {
        match self
            .stages
            .iter_mut()
            .find(|existing| existing.name() == stage.name())
        {
            Some(existing) if existing.identity() == stage.identity() => false,
            Some(existing) => {
                *existing = stage;
                true
            }
            None => {
                self.stages.push(stage);
                true
            }
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.stages.iter().any(|stage| stage.name() == name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    #[must_use]
    pub fn emit(&self, emission: Emission) -> Emission {
        self.stages
            .iter()
            .fold(emission, |current, stage| stage.emit(current))
    }
}

impl Serialize for EmitterChain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

pub const TOOLCHAIN_DEPENDENCY: &str = "icecream_toolchain_dependency";

/// Makes every real object depend on the wrapper, so a new toolchain rebuilds them.
#[derive(Debug, Clone)]
pub struct ToolchainDependencyEmitter {
    wrapper: PathBuf,
}

impl ToolchainDependencyEmitter {
    pub fn new(wrapper: impl Into<PathBuf>) -> Self {
        Self {
            wrapper: wrapper.into(),
        }
    }
}

impl Emitter for ToolchainDependencyEmitter {
    fn name(&self) -> &str {
        TOOLCHAIN_DEPENDENCY
    }

    fn identity(&self) -> String {
        format!("{TOOLCHAIN_DEPENDENCY}:{}", self.wrapper.display())
    }

    fn emit(&self, mut emission: Emission) -> Emission {
        let probe = emission
            .targets
            .first()
            .map(|target| is_probe_target(target))
            .unwrap_or(false);
        if !probe && !emission.dependencies.contains(&self.wrapper) {
            emission.dependencies.push(self.wrapper.clone());
        }
        emission
    }
}
