//! The whole dispatcher setup pass, from probe to installed commands.

use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use icewrap_store::{Fingerprint, StableHandle};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::deferred::DeferredValue;
use crate::dispatch::{
    install_dispatch, select_preprocess_mode, DispatchPlan, HostChanges, HostEnv, PreprocessMode,
};
use crate::effects::Effects;
use crate::errors::ConfigError;
use crate::probe::{is_executable, probe_client, ClientVersion};
use crate::toolchain::{
    resolve_toolchain_package, with_platform_extra_files, CompilerFamily, PackageRequest,
    Toolchain, ToolchainPackage,
};
use crate::wrapper::{generate_wrapper, WrapperOutcome, WrapperTemplate, WRAPPER_NAME};

/// Absolute paths to every external program setup relies on.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTools {
    pub icecc: PathBuf,
    pub icerun: Option<PathBuf>,
    pub create_env: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveDispatch {
    pub client_version: String,
    pub tools: ResolvedTools,
    pub toolchain: Toolchain,
    pub package: ToolchainPackage,
    pub handle: StableHandle,
    pub fingerprint: Fingerprint,
    pub wrapper: WrapperOutcome,
    pub preprocess: PreprocessMode,
    pub changes: HostChanges,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SetupReport {
    /// Dispatch declined; the build stays local.
    Inactive { reason: String },
    Active(Box<ActiveDispatch>),
}

impl SetupReport {
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

/// Probe, package, fingerprint, wrap, and install dispatch into `host`.
///
/// A missing or too-old client yields [`SetupReport::Inactive`] and leaves
/// `host` untouched. Configuration errors abort before `host` is modified.
///
/// # Errors
///
/// Returns a [`ConfigError`] for fatal configuration problems and other errors
/// for I/O or helper failures.
pub fn setup(effects: &dyn Effects, config: &DispatchConfig, host: &mut HostEnv) -> Result<SetupReport> {
    let Some(client) = probe_client(effects, &config.icecc, &config.min_version) else {
        let reason = format!(
            "no icecream client at least {} found for '{}'",
            config.min_version, config.icecc
        );
        info!(%reason, "icecream dispatch inactive");
        return Ok(SetupReport::Inactive { reason });
    };

    let tools = resolve_tools(effects, config, &client)?;
    let toolchain = resolve_toolchain(effects, config)?;
    let preprocess =
        select_preprocess_mode(&toolchain.family, &client.version, config.object_cache_active)?;

    let target_dir = absolutize(&config.target_dir)?;
    let extra_files = with_platform_extra_files(&config.extra_files, &toolchain, &client.version);
    let package = resolve_toolchain_package(
        effects,
        &PackageRequest {
            source: &config.toolchain_source,
            extra_files: &extra_files,
            target_dir: &target_dir,
            toolchain: &toolchain,
            client_version: &client.version,
            create_env: tools.create_env.as_deref(),
        },
    )?;

    let handle = icewrap_store::stabilize(
        &package.archive,
        &target_dir.join(format!("{}.local", package.version_id)),
    )?;
    let fingerprint = icewrap_store::fingerprint(&handle.path, &package.version_id)?;

    let template = match &config.wrapper_template {
        Some(path) => WrapperTemplate::from_file(path)?,
        None => WrapperTemplate::default(),
    };
    let pointer = DeferredValue::new(&fingerprint.pointer_file);
    let wrapper = generate_wrapper(
        &template,
        &tools.icecc,
        &pointer,
        config.arch.as_deref(),
        &target_dir.join(WRAPPER_NAME),
    )?;

    let mut changes = install_dispatch(
        host,
        &DispatchPlan {
            wrapper: wrapper.path.clone(),
            icerun: tools.icerun.clone(),
            scheduler: config.scheduler.clone(),
            object_cache_active: config.object_cache_active,
        },
    );
    preprocess.apply(host, &mut changes);

    info!(
        client = %client.version,
        wrapper = %wrapper.path.display(),
        digest = %fingerprint.digest,
        "icecream dispatch active"
    );
    Ok(SetupReport::Active(Box::new(ActiveDispatch {
        client_version: client.version.to_string(),
        tools,
        toolchain,
        package,
        handle,
        fingerprint,
        wrapper,
        preprocess,
        changes,
    })))
}

fn resolve_tools(
    effects: &dyn Effects,
    config: &DispatchConfig,
    client: &ClientVersion,
) -> Result<ResolvedTools> {
    let icecc = absolutize(&client.path)?;
    let icerun = match &config.icerun {
        Some(requested) => Some(effects.locate(requested).ok_or_else(|| {
            ConfigError::MissingTool {
                tool: "icerun".to_string(),
                requested: requested.clone(),
            }
        })?),
        None => sibling(&icecc, "icerun"),
    };
    if icerun.is_none() {
        warn!("icerun not found next to icecc; non-compile jobs will not be throttled");
    }
    let create_env = match &config.create_env {
        Some(requested) => Some(effects.locate(requested).ok_or_else(|| {
            ConfigError::MissingTool {
                tool: "icecc-create-env".to_string(),
                requested: requested.clone(),
            }
        })?),
        None => sibling(&icecc, "icecc-create-env"),
    };
    Ok(ResolvedTools {
        icecc,
        icerun: icerun.map(|path| absolutize(&path)).transpose()?,
        create_env: create_env.map(|path| absolutize(&path)).transpose()?,
    })
}

fn resolve_toolchain(effects: &dyn Effects, config: &DispatchConfig) -> Result<Toolchain> {
    let locate = |requested: &str| {
        effects
            .locate(requested)
            .ok_or_else(|| ConfigError::MissingTool {
                tool: "compiler".to_string(),
                requested: requested.to_string(),
            })
    };
    let cc = absolutize(&locate(&config.cc)?)?;
    let cxx = absolutize(&locate(&config.cxx)?)?;
    let family = config
        .compiler_family
        .clone()
        .unwrap_or_else(|| CompilerFamily::detect(effects, &cc));
    let compiler_type = config.compiler_type.clone().unwrap_or_else(|| {
        cc.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    });
    debug!(cc = %cc.display(), cxx = %cxx.display(), %family, "resolved toolchain");
    Ok(Toolchain {
        cc,
        cxx,
        family,
        compiler_type,
    })
}

fn sibling(icecc: &Path, name: &str) -> Option<PathBuf> {
    let candidate = icecc.parent()?.join(name);
    is_executable(&candidate).then_some(candidate)
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()
            .context("failed to read the current directory")?
            .join(path))
    }
}
