#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use assert_cmd::{assert::Assert, cargo::cargo_bin_cmd, Command};
use serde_json::Value;
use tempfile::TempDir;

/// Variables that would otherwise leak the developer's toolchain into a test.
const ISOLATED_VARS: &[&str] = &[
    "ICECC",
    "ICERUN",
    "ICECC_CREATE_ENV",
    "ICECC_VERSION",
    "ICECC_VERSION_ARCH",
    "ICECC_SCHEDULER",
    "ICECC_COMPILER_TYPE",
    "ICECREAM_TARGET_DIR",
    "CC",
    "CXX",
    "CCFLAGS",
    "CCACHE_VERSION",
    "CCACHE_NOCPP2",
];

/// A scratch directory holding fake icecream tools and compilers.
pub struct FakePool {
    pub temp: TempDir,
    pub bin: PathBuf,
}

impl FakePool {
    /// Client reporting `version`, with create-env, icerun, and a gcc-12 pair next to it.
    pub fn new(version: &str) -> Self {
        let temp = tempfile::Builder::new()
            .prefix("icewrap-cli")
            .tempdir()
            .expect("tempdir");
        let bin = temp.path().join("bin");
        fs::create_dir_all(&bin).expect("bin dir");
        let pool = Self { temp, bin };
        pool.script("icecc", &format!("echo \"ICECC {version}\"\n"));
        pool.script(
            "icecc-create-env",
            "printf 'toolchain for %s\\n' \"$*\" > x.tar.gz\necho \"creating x.tar.gz\"\n",
        );
        pool.script("icerun", "exec \"$@\"\n");
        pool.script("gcc-12", "echo \"gcc-12 (GCC) 12.2.0\"\necho \"Copyright (C) 2022 Free Software Foundation, Inc.\"\n");
        pool.script("g++-12", "echo \"g++-12 (GCC) 12.2.0\"\n");
        pool
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn tool(&self, name: &str) -> PathBuf {
        self.bin.join(name)
    }

    pub fn target_dir(&self) -> PathBuf {
        self.root().join("build").join("icecream")
    }

    /// Write an executable `/bin/sh` script into the pool's bin directory.
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.bin.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
        make_executable(&path);
        path
    }

    /// `icewrap` running in the pool root with the host's icecream variables cleared.
    pub fn icewrap(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("icewrap");
        cmd.current_dir(self.root());
        for var in ISOLATED_VARS {
            cmd.env_remove(var);
        }
        cmd
    }

    /// `icewrap --json setup` wired to this pool's tools.
    pub fn setup(&self) -> Command {
        let mut cmd = self.icewrap();
        cmd.arg("--json")
            .arg("setup")
            .arg("--icecc")
            .arg(self.tool("icecc"))
            .arg("--cc")
            .arg(self.tool("gcc-12"))
            .arg("--cxx")
            .arg(self.tool("g++-12"));
        cmd
    }

    /// Names of the files in the target directory, sorted.
    pub fn artifacts(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.target_dir())
            .map(|entries| {
                entries
                    .flatten()
                    .map(|entry| entry.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) {}
