//! Turning a toolchain source into an archive icecream can ship to the pool.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use pep440_rs::Version;
use serde::Serialize;
use toml_edit::Value as TomlValue;
use tracing::{debug, info};

use crate::effects::Effects;
use crate::errors::ConfigError;
use crate::probe::{builtin_version, LAST_REMAP_VERSION};
use crate::process::Capture;

const DERIVE_SENTINEL: &str = "derive";
const CPUINFO: &str = "/proc/cpuinfo";

/// Where the compiler environment archive comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolchainSource {
    Url(String),
    Path(PathBuf),
    Derive,
}

impl ToolchainSource {
    /// Classify the raw `ICECC_VERSION` value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BadUrl`] when an `http` value is not a URL.
    pub fn classify(raw: Option<&str>) -> Result<Self, ConfigError> {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(Self::Derive);
        };
        if raw == DERIVE_SENTINEL {
            return Ok(Self::Derive);
        }
        if raw.starts_with("http") {
            url::Url::parse(raw).map_err(|_| ConfigError::BadUrl {
                url: raw.to_string(),
            })?;
            return Ok(Self::Url(raw.to_string()));
        }
        Ok(Self::Path(PathBuf::from(raw)))
    }
}

/// A file to embed in a derived environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ExtraFile {
    Bare(PathBuf),
    Remap { dest: PathBuf, source: PathBuf },
}

impl ExtraFile {
    /// Read one entry of the `extra_files` array: a string or a two-element array.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BadExtraFile`] for any other shape.
    pub fn from_toml(index: usize, value: &TomlValue) -> Result<Self, ConfigError> {
        let bad = || ConfigError::BadExtraFile {
            index,
            found: value.to_string().trim().to_string(),
        };
        if let Some(path) = value.as_str() {
            return Ok(Self::Bare(PathBuf::from(path)));
        }
        let array = value.as_array().ok_or_else(bad)?;
        if array.len() != 2 {
            return Err(bad());
        }
        let dest = array.get(0).and_then(TomlValue::as_str).ok_or_else(bad)?;
        let source = array.get(1).and_then(TomlValue::as_str).ok_or_else(bad)?;
        Ok(Self::Remap {
            dest: PathBuf::from(dest),
            source: PathBuf::from(source),
        })
    }

    /// Read a command-line entry: `PATH` or `DEST=SOURCE`.
    ///
    /// Paths containing `=` cannot be written this way; build a [`Self::Remap`]
    /// directly instead.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BadExtraFile`] for empty parts or more than one `=`.
    pub fn from_arg(index: usize, raw: &str) -> Result<Self, ConfigError> {
        let bad = || ConfigError::BadExtraFile {
            index,
            found: format!("{raw:?}"),
        };
        let parts: Vec<&str> = raw.split('=').collect();
        match parts.as_slice() {
            [path] if !path.is_empty() => Ok(Self::Bare(PathBuf::from(*path))),
            [dest, source] if !dest.is_empty() && !source.is_empty() => Ok(Self::Remap {
                dest: PathBuf::from(*dest),
                source: PathBuf::from(*source),
            }),
            _ => Err(bad()),
        }
    }

    /// The local file the archive depends on.
    #[must_use]
    pub fn source(&self) -> &Path {
        match self {
            Self::Bare(path) => path,
            Self::Remap { source, .. } => source,
        }
    }
}

impl fmt::Display for ExtraFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bare(path) => write!(f, "{}", path.display()),
            Self::Remap { dest, source } => write!(f, "{}={}", dest.display(), source.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilerFamily {
    Clang,
    Gcc,
    Other(String),
}

impl CompilerFamily {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "clang" => Some(Self::Clang),
            "gcc" | "gnu" => Some(Self::Gcc),
            _ => None,
        }
    }

    /// Guess from the compiler's file name, then from its `--version` banner.
    pub fn detect(effects: &dyn Effects, cc: &Path) -> Self {
        let name = cc
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.contains("clang") {
            return Self::Clang;
        }
        if name.contains("gcc") || name.contains("g++") {
            return Self::Gcc;
        }
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        if let Ok(output) = effects.run(cc, &["--version".to_string()], &cwd, Capture::StdoutOnly) {
            if output.success() {
                if output.stdout.contains("clang") {
                    return Self::Clang;
                }
                if output.stdout.contains("Free Software Foundation")
                    || output.stdout.contains("(GCC)")
                {
                    return Self::Gcc;
                }
            }
        }
        Self::Other(name)
    }
}

impl fmt::Display for CompilerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clang => f.write_str("clang"),
            Self::Gcc => f.write_str("gcc"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Resolved compilers the environment is built for.
#[derive(Debug, Clone, Serialize)]
pub struct Toolchain {
    pub cc: PathBuf,
    pub cxx: PathBuf,
    pub family: CompilerFamily,
    /// Flag passed to icecc-create-env as `--<compiler_type>`.
    pub compiler_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageOrigin {
    Downloaded,
    UserProvided,
    Derived,
}

/// A compiler environment archive plus the name we will track it under.
#[derive(Debug, Clone, Serialize)]
pub struct ToolchainPackage {
    pub archive: PathBuf,
    pub version_id: String,
    pub origin: PackageOrigin,
}

pub struct PackageRequest<'a> {
    pub source: &'a ToolchainSource,
    pub extra_files: &'a [ExtraFile],
    pub target_dir: &'a Path,
    pub toolchain: &'a Toolchain,
    pub client_version: &'a Version,
    pub create_env: Option<&'a Path>,
}

/// Produce the archive for `request.source`.
///
/// # Errors
///
/// Returns a [`ConfigError`] for unusable configuration and other errors for
/// download or helper failures.
pub fn resolve_toolchain_package(
    effects: &dyn Effects,
    request: &PackageRequest<'_>,
) -> Result<ToolchainPackage> {
    fs::create_dir_all(request.target_dir)
        .with_context(|| format!("failed to create {}", request.target_dir.display()))?;
    match request.source {
        ToolchainSource::Url(url) => {
            let quoted = icewrap_store::quote_url(url);
            let dest = request.target_dir.join(&quoted);
            info!(%url, "downloading compiler environment");
            icewrap_store::download_archive(url, &dest)?;
            Ok(ToolchainPackage {
                archive: dest,
                version_id: format!("user_provided.{quoted}"),
                origin: PackageOrigin::Downloaded,
            })
        }
        ToolchainSource::Path(path) => {
            if !path.is_file() {
                return Err(ConfigError::MissingPackage { path: path.clone() }.into());
            }
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .ok_or_else(|| ConfigError::MissingPackage { path: path.clone() })?;
            Ok(ToolchainPackage {
                archive: path.clone(),
                version_id: format!("user_provided.{name}"),
                origin: PackageOrigin::UserProvided,
            })
        }
        ToolchainSource::Derive => derive_package(effects, request),
    }
}

/// Name a derived archive after the compilers it packages.
#[must_use]
pub fn derived_version_id(toolchain: &Toolchain) -> String {
    format!(
        "icecc-create-env.{}{}.tar.gz",
        toolchain.cc.display(),
        toolchain.cxx.display()
    )
    .replace('/', "_")
}

/// Arguments for icecc-create-env, validating remaps against the client version.
///
/// # Errors
///
/// Returns [`ConfigError::RemapUnsupported`] when remapping is requested of a
/// client newer than 1.1.
pub fn create_env_args(
    toolchain: &Toolchain,
    extra_files: &[ExtraFile],
    client_version: &Version,
) -> Result<Vec<String>, ConfigError> {
    let mut args = vec![
        format!("--{}", toolchain.compiler_type),
        toolchain.cc.display().to_string(),
        toolchain.cxx.display().to_string(),
    ];
    let remap_limit = builtin_version(LAST_REMAP_VERSION);
    for extra in extra_files {
        match extra {
            ExtraFile::Bare(path) => {
                args.push("--addfile".to_string());
                args.push(absolute(path).display().to_string());
            }
            ExtraFile::Remap { dest, source } => {
                if *client_version > remap_limit {
                    return Err(ConfigError::RemapUnsupported {
                        version: client_version.to_string(),
                        dest: dest.display().to_string(),
                        source: source.display().to_string(),
                    });
                }
                args.push("--addfile".to_string());
                args.push(format!(
                    "{}={}",
                    absolute(dest).display(),
                    absolute(source).display()
                ));
            }
        }
    }
    Ok(args)
}

/// Older clients ship the build host's cpuinfo, which confuses clang on the pool.
#[must_use]
pub fn with_platform_extra_files(
    extra_files: &[ExtraFile],
    toolchain: &Toolchain,
    client_version: &Version,
) -> Vec<ExtraFile> {
    let mut files = extra_files.to_vec();
    let cpuinfo = ExtraFile::Remap {
        dest: PathBuf::from(CPUINFO),
        source: PathBuf::from("/dev/null"),
    };
    if *client_version <= builtin_version(LAST_REMAP_VERSION)
        && toolchain.family == CompilerFamily::Clang
        && Path::new(CPUINFO).exists()
        && !files.contains(&cpuinfo)
    {
        files.push(cpuinfo);
    }
    files
}

/// Pull the archive name out of icecc-create-env's chatter.
#[must_use]
pub fn parse_created_archive(stdout: &str) -> Option<&str> {
    stdout.lines().find_map(|line| {
        let rest = line.strip_prefix("creating ")?;
        let name = rest.split_whitespace().next()?;
        name.contains(".tar.gz").then_some(name)
    })
}

fn derive_package(effects: &dyn Effects, request: &PackageRequest<'_>) -> Result<ToolchainPackage> {
    let helper = request.create_env.ok_or_else(|| ConfigError::MissingTool {
        tool: "icecc-create-env".to_string(),
        requested: "icecc-create-env".to_string(),
    })?;
    let args = create_env_args(request.toolchain, request.extra_files, request.client_version)?;
    let version_id = derived_version_id(request.toolchain);
    let target = request.target_dir.join(&version_id);

    debug!(helper = %helper.display(), ?args, "generating compiler environment");
    let output = effects.run(helper, &args, request.target_dir, Capture::Both)?;
    if !output.success() {
        anyhow::bail!(
            "icecc-create-env exited with {}: {}",
            output.code,
            output.stderr.trim()
        );
    }
    let created = parse_created_archive(&output.stdout).ok_or(ConfigError::NoArchiveCreated)?;
    let created = request.target_dir.join(created);
    fs::rename(&created, &target).with_context(|| {
        format!(
            "failed to move {} to {}",
            created.display(),
            target.display()
        )
    })?;
    info!(archive = %target.display(), "generated compiler environment");
    Ok(ToolchainPackage {
        archive: target,
        version_id,
        origin: PackageOrigin::Derived,
    })
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::parse_version;
    use toml_edit::DocumentMut;

    fn toolchain(family: CompilerFamily) -> Toolchain {
        Toolchain {
            cc: PathBuf::from("/usr/bin/cc"),
            cxx: PathBuf::from("/usr/bin/c++"),
            family,
            compiler_type: "gcc".to_string(),
        }
    }

    fn parse_entries(source: &str) -> Vec<Result<ExtraFile, ConfigError>> {
        let doc: DocumentMut = source.parse().expect("toml");
        doc["extra_files"]
            .as_array()
            .expect("array")
            .iter()
            .enumerate()
            .map(|(index, value)| ExtraFile::from_toml(index, value))
            .collect()
    }

    #[test]
    fn classify_recognizes_each_source_kind() {
        assert_eq!(ToolchainSource::classify(None), Ok(ToolchainSource::Derive));
        assert_eq!(ToolchainSource::classify(Some("")), Ok(ToolchainSource::Derive));
        assert_eq!(
            ToolchainSource::classify(Some("derive")),
            Ok(ToolchainSource::Derive)
        );
        assert_eq!(
            ToolchainSource::classify(Some("https://example.com/gcc.tar.gz")),
            Ok(ToolchainSource::Url("https://example.com/gcc.tar.gz".to_string()))
        );
        assert_eq!(
            ToolchainSource::classify(Some("envs/gcc.tar.gz")),
            Ok(ToolchainSource::Path(PathBuf::from("envs/gcc.tar.gz")))
        );
        assert!(matches!(
            ToolchainSource::classify(Some("http//nope")),
            Err(ConfigError::BadUrl { .. })
        ));
    }

    #[test]
    fn extra_files_accept_paths_and_pairs() {
        let entries = parse_entries(r#"extra_files = ["/etc/ld.so.conf", ["/proc/cpuinfo", "/dev/null"]]"#);
        assert_eq!(
            entries,
            vec![
                Ok(ExtraFile::Bare(PathBuf::from("/etc/ld.so.conf"))),
                Ok(ExtraFile::Remap {
                    dest: PathBuf::from("/proc/cpuinfo"),
                    source: PathBuf::from("/dev/null"),
                }),
            ]
        );
    }

    #[test]
    fn extra_files_reject_other_shapes_at_any_position() {
        let entries = parse_entries(
            r#"extra_files = ["/a", ["/b"], ["/c", "/d", "/e"], 7, ["/f", 3], { path = "/g" }]"#,
        );
        assert!(entries[0].is_ok());
        for (index, entry) in entries.iter().enumerate().skip(1) {
            match entry {
                Err(ConfigError::BadExtraFile { index: reported, .. }) => {
                    assert_eq!(*reported, index);
                }
                other => panic!("entry {index} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn extra_file_args_split_on_equals() {
        assert_eq!(
            ExtraFile::from_arg(0, "/etc/hosts"),
            Ok(ExtraFile::Bare(PathBuf::from("/etc/hosts")))
        );
        assert_eq!(
            ExtraFile::from_arg(1, "/proc/cpuinfo=/dev/null"),
            Ok(ExtraFile::Remap {
                dest: PathBuf::from("/proc/cpuinfo"),
                source: PathBuf::from("/dev/null"),
            })
        );
        assert!(ExtraFile::from_arg(2, "/a=/b=/c").is_err());
        assert!(ExtraFile::from_arg(3, "=/b").is_err());
        assert!(ExtraFile::from_arg(4, "").is_err());
    }

    #[test]
    fn create_env_args_list_compilers_then_addfiles() {
        let version = parse_version("1.1").unwrap();
        let args = create_env_args(
            &toolchain(CompilerFamily::Gcc),
            &[
                ExtraFile::Bare(PathBuf::from("/etc/hosts")),
                ExtraFile::Remap {
                    dest: PathBuf::from("/proc/cpuinfo"),
                    source: PathBuf::from("/dev/null"),
                },
            ],
            &version,
        )
        .unwrap();
        assert_eq!(
            args,
            vec![
                "--gcc",
                "/usr/bin/cc",
                "/usr/bin/c++",
                "--addfile",
                "/etc/hosts",
                "--addfile",
                "/proc/cpuinfo=/dev/null",
            ]
        );
    }

    #[test]
    fn remapping_is_rejected_on_newer_clients() {
        let version = parse_version("1.2").unwrap();
        let err = create_env_args(
            &toolchain(CompilerFamily::Gcc),
            &[ExtraFile::Remap {
                dest: PathBuf::from("/proc/cpuinfo"),
                source: PathBuf::from("/dev/null"),
            }],
            &version,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::RemapUnsupported { .. }));
    }

    #[test]
    fn derived_id_flattens_compiler_paths() {
        assert_eq!(
            derived_version_id(&toolchain(CompilerFamily::Gcc)),
            "icecc-create-env._usr_bin_cc_usr_bin_c++.tar.gz"
        );
    }

    #[test]
    fn created_archive_is_read_from_helper_output() {
        let stdout = "adding file /usr/bin/gcc\ncreating 3f2a9c.tar.gz\n";
        assert_eq!(parse_created_archive(stdout), Some("3f2a9c.tar.gz"));
        assert_eq!(parse_created_archive("creating nothing\n"), None);
    }

    #[test]
    fn cpuinfo_workaround_only_for_old_clang_clients() {
        let old = parse_version("1.1").unwrap();
        let new = parse_version("1.2").unwrap();
        let gcc = with_platform_extra_files(&[], &toolchain(CompilerFamily::Gcc), &old);
        assert!(gcc.is_empty());
        let clang_new = with_platform_extra_files(&[], &toolchain(CompilerFamily::Clang), &new);
        assert!(clang_new.is_empty());
        let clang_old = with_platform_extra_files(&[], &toolchain(CompilerFamily::Clang), &old);
        if Path::new(CPUINFO).exists() {
            assert_eq!(clang_old.len(), 1);
            let again = with_platform_extra_files(&clang_old, &toolchain(CompilerFamily::Clang), &old);
            assert_eq!(again.len(), 1);
        } else {
            assert!(clang_old.is_empty());
        }
    }

    #[test]
    fn missing_user_package_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let source = ToolchainSource::Path(temp.path().join("missing.tar.gz"));
        let version = parse_version("1.2").unwrap();
        let toolchain = toolchain(CompilerFamily::Gcc);
        let request = PackageRequest {
            source: &source,
            extra_files: &[],
            target_dir: &temp.path().join("out"),
            toolchain: &toolchain,
            client_version: &version,
            create_env: None,
        };
        let err = resolve_toolchain_package(&crate::effects::SystemEffects, &request).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingPackage { .. })
        ));
    }

    #[test]
    fn user_package_keeps_its_name_in_the_id() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("clang-12.tar.gz");
        fs::write(&archive, b"env").unwrap();
        let source = ToolchainSource::Path(archive.clone());
        let version = parse_version("1.2").unwrap();
        let toolchain = toolchain(CompilerFamily::Clang);
        let request = PackageRequest {
            source: &source,
            extra_files: &[],
            target_dir: &temp.path().join("out"),
            toolchain: &toolchain,
            client_version: &version,
            create_env: None,
        };
        let package = resolve_toolchain_package(&crate::effects::SystemEffects, &request).unwrap();
        assert_eq!(package.archive, archive);
        assert_eq!(package.version_id, "user_provided.clang-12.tar.gz");
        assert_eq!(package.origin, PackageOrigin::UserProvided);
    }

    #[test]
    fn url_package_is_named_after_the_quoted_url() -> Result<()> {
        use httptest::{matchers::request, responders::status_code, Expectation, Server};

        let Ok(server) = std::panic::catch_unwind(Server::run) else {
            eprintln!("skipping url package test (httptest server unavailable)");
            return Ok(());
        };
        server.expect(
            Expectation::matching(request::method_path("GET", "/envs/clang-16.tar.gz"))
                .respond_with(status_code(200).body("clang env")),
        );
        let url = server.url_str("/envs/clang-16.tar.gz");
        let temp = tempfile::tempdir()?;
        let target_dir = temp.path().join("out");
        let source = ToolchainSource::classify(Some(&url))?;
        let version = parse_version("1.2")?;
        let toolchain = toolchain(CompilerFamily::Clang);
        let request = PackageRequest {
            source: &source,
            extra_files: &[],
            target_dir: &target_dir,
            toolchain: &toolchain,
            client_version: &version,
            create_env: None,
        };

        let package = resolve_toolchain_package(&crate::effects::SystemEffects, &request)?;

        let quoted = icewrap_store::quote_url(&url);
        assert_eq!(package.version_id, format!("user_provided.{quoted}"));
        assert_eq!(package.archive, target_dir.join(&quoted));
        assert_eq!(package.origin, PackageOrigin::Downloaded);
        assert_eq!(fs::read(&package.archive)?, b"clang env");
        Ok(())
    }
}
