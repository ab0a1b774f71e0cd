//! Dispatcher configuration: defaults, then `icewrap.toml`, then the environment.

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use pep440_rs::Version;
use toml_edit::{DocumentMut, Item};

use crate::errors::ConfigError;
use crate::probe::{default_min_version, parse_version};
use crate::toolchain::{CompilerFamily, ExtraFile, ToolchainSource};

pub const CONFIG_FILENAME: &str = "icewrap.toml";
pub const DEFAULT_TARGET_DIR: &str = "build/icecream";
const CONFIG_TABLE: &str = "dispatch";

#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    #[must_use]
    pub fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Every knob the dispatcher recognizes.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub toolchain_source: ToolchainSource,
    pub extra_files: Vec<ExtraFile>,
    pub min_version: Version,
    pub scheduler: Option<String>,
    pub arch: Option<String>,
    pub object_cache_active: bool,
    pub icecc: String,
    pub icerun: Option<String>,
    pub create_env: Option<String>,
    pub cc: String,
    pub cxx: String,
    pub compiler_type: Option<String>,
    pub compiler_family: Option<CompilerFamily>,
    pub target_dir: PathBuf,
    pub wrapper_template: Option<PathBuf>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            toolchain_source: ToolchainSource::Derive,
            extra_files: Vec::new(),
            min_version: default_min_version(),
            scheduler: None,
            arch: None,
            object_cache_active: false,
            icecc: "icecc".to_string(),
            icerun: None,
            create_env: None,
            cc: "cc".to_string(),
            cxx: "c++".to_string(),
            compiler_type: None,
            compiler_family: None,
            target_dir: PathBuf::from(DEFAULT_TARGET_DIR),
            wrapper_template: None,
        }
    }
}

impl DispatchConfig {
    /// Defaults, overlaid with `file` (or `./icewrap.toml` when present), then `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or holds invalid values.
    pub fn load(file: Option<&Path>, snapshot: &EnvSnapshot) -> Result<Self> {
        let mut config = Self::default();
        let implicit = PathBuf::from(CONFIG_FILENAME);
        let path = match file {
            Some(path) => Some(path.to_path_buf()),
            None if implicit.is_file() => Some(implicit),
            None => None,
        };
        if let Some(path) = path {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            config.apply_toml(&path, &contents)?;
        }
        config.apply_env(snapshot)?;
        Ok(config)
    }

    /// Overlay values from an `icewrap.toml` document.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the document or any value is malformed.
    pub fn apply_toml(&mut self, path: &Path, contents: &str) -> Result<(), ConfigError> {
        let bad = |message: String| ConfigError::BadConfigFile {
            path: path.to_path_buf(),
            message,
        };
        let doc: DocumentMut = contents.parse().map_err(|err| bad(format!("{err}")))?;
        let Some(table) = doc.get(CONFIG_TABLE) else {
            return Ok(());
        };
        let table = table
            .as_table_like()
            .ok_or_else(|| bad(format!("[{CONFIG_TABLE}] must be a table")))?;

        let string = |key: &str| -> Result<Option<String>, ConfigError> {
            match table.get(key) {
                None => Ok(None),
                Some(item) => item
                    .as_str()
                    .map(|value| Some(value.to_string()))
                    .ok_or_else(|| bad(format!("{key} must be a string"))),
            }
        };

        if let Some(source) = string("toolchain")? {
            self.toolchain_source = ToolchainSource::classify(Some(&source))?;
        }
        if let Some(item) = table.get("extra_files") {
            self.extra_files = parse_extra_files(item)?
                .ok_or_else(|| bad("extra_files must be an array".to_string()))?;
        }
        if let Some(min) = string("min_version")? {
            self.min_version = parse_version(&min)?;
        }
        if let Some(scheduler) = string("scheduler")? {
            self.scheduler = Some(scheduler);
        }
        if let Some(arch) = string("arch")? {
            self.arch = Some(arch);
        }
        if let Some(item) = table.get("object_cache") {
            self.object_cache_active = item
                .as_bool()
                .ok_or_else(|| bad("object_cache must be a boolean".to_string()))?;
        }
        if let Some(icecc) = string("icecc")? {
            self.icecc = icecc;
        }
        self.icerun = string("icerun")?.or(self.icerun.take());
        self.create_env = string("create_env")?.or(self.create_env.take());
        if let Some(cc) = string("cc")? {
            self.cc = cc;
        }
        if let Some(cxx) = string("cxx")? {
            self.cxx = cxx;
        }
        self.compiler_type = string("compiler_type")?.or(self.compiler_type.take());
        if let Some(family) = string("compiler_family")? {
            self.compiler_family = Some(
                CompilerFamily::from_name(&family).unwrap_or(CompilerFamily::Other(family)),
            );
        }
        if let Some(dir) = string("target_dir")? {
            self.target_dir = PathBuf::from(dir);
        }
        if let Some(template) = string("wrapper_template")? {
            self.wrapper_template = Some(PathBuf::from(template));
        }
        Ok(())
    }

    /// Overlay the conventional icecream environment variables.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when `ICECC_VERSION` is a malformed URL.
    pub fn apply_env(&mut self, snapshot: &EnvSnapshot) -> Result<(), ConfigError> {
        if let Some(source) = snapshot.var("ICECC_VERSION") {
            self.toolchain_source = ToolchainSource::classify(Some(source))?;
        }
        if let Some(icecc) = snapshot.var("ICECC") {
            self.icecc = icecc.to_string();
        }
        if let Some(icerun) = snapshot.var("ICERUN") {
            self.icerun = Some(icerun.to_string());
        }
        if let Some(helper) = snapshot.var("ICECC_CREATE_ENV") {
            self.create_env = Some(helper.to_string());
        }
        if let Some(arch) = snapshot.var("ICECC_VERSION_ARCH") {
            self.arch = Some(arch.to_string());
        }
        if let Some(scheduler) = snapshot.var("ICECC_SCHEDULER") {
            self.scheduler = Some(scheduler.to_string());
        }
        if let Some(compiler_type) = snapshot.var("ICECC_COMPILER_TYPE") {
            self.compiler_type = Some(compiler_type.to_string());
        }
        if let Some(dir) = snapshot.var("ICECREAM_TARGET_DIR") {
            self.target_dir = PathBuf::from(dir);
        }
        if let Some(cc) = snapshot.var("CC") {
            self.cc = cc.to_string();
        }
        if let Some(cxx) = snapshot.var("CXX") {
            self.cxx = cxx.to_string();
        }
        if snapshot.contains("CCACHE_VERSION") {
            self.object_cache_active = true;
        }
        Ok(())
    }
}

/// `None` when `item` is not an array at all.
fn parse_extra_files(item: &Item) -> Result<Option<Vec<ExtraFile>>, ConfigError> {
    let Some(array) = item.as_array() else {
        return Ok(None);
    };
    array
        .iter()
        .enumerate()
        .map(|(index, value)| ExtraFile::from_toml(index, value))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}
