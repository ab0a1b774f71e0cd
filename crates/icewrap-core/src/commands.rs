//! Command handlers behind the `icewrap` binary.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::json;

use crate::config::{DispatchConfig, EnvSnapshot};
use crate::deferred::DeferredValue;
use crate::dispatch::HostEnv;
use crate::effects::{Effects, SystemEffects};
use crate::errors::ConfigError;
use crate::outcome::ExecutionOutcome;
use crate::probe::{parse_version, probe_client};
use crate::setup::{setup, SetupReport};
use crate::toolchain::{CompilerFamily, ExtraFile, ToolchainSource};
use crate::wrapper::{generate_wrapper, WrapperTemplate};

/// Shared state every command runs against.
pub struct CommandContext {
    env: EnvSnapshot,
    config_file: Option<PathBuf>,
    effects: Box<dyn Effects>,
}

impl CommandContext {
    #[must_use]
    pub fn new(config_file: Option<PathBuf>) -> Self {
        Self::with_effects(config_file, EnvSnapshot::capture(), Box::new(SystemEffects::new()))
    }

    #[must_use]
    pub fn with_effects(
        config_file: Option<PathBuf>,
        env: EnvSnapshot,
        effects: Box<dyn Effects>,
    ) -> Self {
        Self {
            env,
            config_file,
            effects,
        }
    }

    pub fn effects(&self) -> &dyn Effects {
        self.effects.as_ref()
    }

    /// Load the layered configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or holds invalid values.
    pub fn config(&self) -> Result<DispatchConfig> {
        DispatchConfig::load(self.config_file.as_deref(), &self.env)
    }

    /// Host state as handed to a fresh build: default commands plus the
    /// flags and cache switches already present in the environment.
    #[must_use]
    pub fn host(&self) -> HostEnv {
        let mut host = HostEnv::with_default_commands();
        if let Some(flags) = self.env.var("CCFLAGS") {
            host.ccflags = flags.split_whitespace().map(str::to_string).collect();
        }
        if let Some(value) = self.env.var("CCACHE_NOCPP2") {
            host.env.insert("CCACHE_NOCPP2".to_string(), value.to_string());
        }
        host
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProbeRequest {
    pub icecc: Option<String>,
    pub min_version: Option<String>,
}

/// Highest-precedence settings taken from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct SetupRequest {
    pub icecc: Option<String>,
    pub toolchain: Option<String>,
    pub addfile: Vec<String>,
    /// `(dest, source)` pairs, appended after `addfile`.
    pub addfile_remap: Vec<(PathBuf, PathBuf)>,
    pub min_version: Option<String>,
    pub scheduler: Option<String>,
    pub arch: Option<String>,
    pub object_cache: bool,
    pub target_dir: Option<PathBuf>,
    pub cc: Option<String>,
    pub cxx: Option<String>,
    pub compiler_family: Option<String>,
}

impl SetupRequest {
    /// Overlay these flags onto `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::ConfigError`] for a malformed flag value.
    pub fn apply(&self, config: &mut DispatchConfig) -> Result<()> {
        if let Some(icecc) = &self.icecc {
            config.icecc = icecc.clone();
        }
        if let Some(raw) = &self.toolchain {
            config.toolchain_source = ToolchainSource::classify(Some(raw))?;
        }
        if !self.addfile.is_empty() || !self.addfile_remap.is_empty() {
            let mut extra_files = self
                .addfile
                .iter()
                .enumerate()
                .map(|(index, raw)| ExtraFile::from_arg(index, raw))
                .collect::<Result<Vec<_>, ConfigError>>()?;
            extra_files.extend(self.addfile_remap.iter().map(|(dest, source)| {
                ExtraFile::Remap {
                    dest: dest.clone(),
                    source: source.clone(),
                }
            }));
            config.extra_files = extra_files;
        }
        if let Some(raw) = &self.min_version {
            config.min_version = parse_version(raw)?;
        }
        if self.scheduler.is_some() {
            config.scheduler = self.scheduler.clone();
        }
        if self.arch.is_some() {
            config.arch = self.arch.clone();
        }
        config.object_cache_active |= self.object_cache;
        if let Some(dir) = &self.target_dir {
            config.target_dir = dir.clone();
        }
        if let Some(cc) = &self.cc {
            config.cc = cc.clone();
        }
        if let Some(cxx) = &self.cxx {
            config.cxx = cxx.clone();
        }
        if let Some(family) = &self.compiler_family {
            config.compiler_family = Some(
                CompilerFamily::from_name(family)
                    .unwrap_or_else(|| CompilerFamily::Other(family.clone())),
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FingerprintRequest {
    pub package: PathBuf,
    pub id: Option<String>,
    pub target_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub pointer: PathBuf,
    pub icecc: PathBuf,
    pub arch: Option<String>,
    pub template: Option<PathBuf>,
    pub dest: PathBuf,
}

/// Report the client version, or that none is usable.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded.
pub fn probe(ctx: &CommandContext, request: &ProbeRequest) -> Result<ExecutionOutcome> {
    let mut config = ctx.config()?;
    if let Some(icecc) = &request.icecc {
        config.icecc = icecc.clone();
    }
    if let Some(raw) = &request.min_version {
        config.min_version = parse_version(raw)?;
    }
    let min = config.min_version.to_string();
    Ok(match probe_client(ctx.effects(), &config.icecc, &config.min_version) {
        Some(client) => ExecutionOutcome::success(
            format!("icecream {} at {}", client.version, client.path.display()),
            json!({
                "available": true,
                "path": client.path,
                "version": client.version.to_string(),
                "min_version": min,
            }),
        ),
        None => ExecutionOutcome::success(
            format!("no icecream client at least {min} found"),
            json!({ "available": false, "requested": config.icecc, "min_version": min }),
        ),
    })
}

/// Run the full setup pass against a fresh host.
///
/// # Errors
///
/// Returns a [`crate::ConfigError`] for fatal configuration and other errors
/// for I/O or helper failures.
pub fn setup_command(ctx: &CommandContext, request: &SetupRequest) -> Result<ExecutionOutcome> {
    let mut config = ctx.config()?;
    request.apply(&mut config)?;
    let mut host = ctx.host();
    let report = setup(ctx.effects(), &config, &mut host)?;
    let message = match &report {
        SetupReport::Inactive { reason } => format!("icecream dispatch inactive: {reason}"),
        SetupReport::Active(active) => format!(
            "icecream dispatch active via {}",
            active.wrapper.path.display()
        ),
    };
    Ok(ExecutionOutcome::success(
        message,
        json!({ "report": report, "host": host }),
    ))
}

/// Stabilize and fingerprint an existing archive.
///
/// # Errors
///
/// Returns an error if the archive cannot be linked, hashed, or recorded.
pub fn fingerprint(ctx: &CommandContext, request: &FingerprintRequest) -> Result<ExecutionOutcome> {
    let target_dir = match &request.target_dir {
        Some(dir) => dir.clone(),
        None => ctx.config()?.target_dir,
    };
    let id = match &request.id {
        Some(id) => id.clone(),
        None => format!("user_provided.{}", file_name(&request.package)),
    };
    let handle = icewrap_store::stabilize(&request.package, &target_dir.join(format!("{id}.local")))?;
    let fingerprint = icewrap_store::fingerprint(&handle.path, &id)?;
    Ok(ExecutionOutcome::success(
        fingerprint.link.display().to_string(),
        json!({ "id": id, "handle": handle, "fingerprint": fingerprint }),
    ))
}

/// Render the wrapper from an existing pointer file.
///
/// # Errors
///
/// Returns an error if the pointer or template cannot be read, or the script cannot be written.
pub fn render(_ctx: &CommandContext, request: &RenderRequest) -> Result<ExecutionOutcome> {
    let template = match &request.template {
        Some(path) => WrapperTemplate::from_file(path)?,
        None => WrapperTemplate::default(),
    };
    let pointer = DeferredValue::new(&request.pointer);
    let outcome = generate_wrapper(
        &template,
        &request.icecc,
        &pointer,
        request.arch.as_deref(),
        &request.dest,
    )?;
    let message = if outcome.written {
        format!("wrote {}", outcome.path.display())
    } else {
        format!("{} is up to date", outcome.path.display())
    };
    Ok(ExecutionOutcome::success(message, json!(outcome)))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
