use std::{collections::BTreeMap, path::Path};

use serde::Serialize;

use super::emitter::{Emission, EmitterChain};
use super::template::CommandTemplate;

/// C suffixes always compiled as C.
pub const C_SUFFIXES: &[&str] = &[".c"];
/// C++ suffixes; `.C` joins them on case-sensitive filesystems and C otherwise.
pub const CXX_SUFFIXES: &[&str] = &[".cpp", ".cc", ".cxx", ".c++", ".C++"];
const UPPER_C: &str = ".C";

/// Command variables that compile one translation unit.
pub const COMPILE_COMMANDS: &[&str] = &["CCCOM", "CXXCOM", "SHCCCOM", "SHCXXCOM"];
/// Non-compile commands that must not swamp the local machine.
pub const THROTTLED_COMMANDS: &[&str] = &["ARCOM", "LINKCOM", "PYTHON", "SHLINKCOM"];

/// Every suffix whose objects are produced by a compile command.
#[must_use]
pub fn object_suffixes() -> Vec<&'static str> {
    let mut suffixes = C_SUFFIXES.to_vec();
    suffixes.extend_from_slice(CXX_SUFFIXES);
    suffixes.push(UPPER_C);
    suffixes
}

/// The slice of host build state the dispatcher reads and rewrites.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostEnv {
    pub commands: BTreeMap<String, CommandTemplate>,
    /// Environment handed to build actions.
    pub env: BTreeMap<String, String>,
    pub ccflags: Vec<String>,
    pub emitters: BTreeMap<String, EmitterChain>,
}

impl HostEnv {
    /// A host with conventional compile, archive, and link commands and an
    /// empty emitter chain for every object suffix.
    #[must_use]
    pub fn with_default_commands() -> Self {
        let mut host = Self::default();
        for (name, base) in [
            ("CCCOM", "$CC -o $TARGET -c $CFLAGS $CCFLAGS $_CCCOMCOM $SOURCES"),
            ("CXXCOM", "$CXX -o $TARGET -c $CXXFLAGS $CCFLAGS $_CCCOMCOM $SOURCES"),
            ("SHCCCOM", "$SHCC -o $TARGET -c $SHCFLAGS $SHCCFLAGS $_CCCOMCOM $SOURCES"),
            ("SHCXXCOM", "$SHCXX -o $TARGET -c $SHCXXFLAGS $SHCCFLAGS $_CCCOMCOM $SOURCES"),
            ("ARCOM", "$AR $ARFLAGS $TARGET $SOURCES"),
            ("LINKCOM", "$LINK -o $TARGET $LINKFLAGS $SOURCES $_LIBDIRFLAGS $_LIBFLAGS"),
            ("SHLINKCOM", "$SHLINK -o $TARGET $SHLINKFLAGS $SOURCES $_LIBDIRFLAGS $_LIBFLAGS"),
        ] {
            host.set_command(name, base);
        }
        for suffix in object_suffixes() {
            host.emitters.insert(suffix.to_string(), EmitterChain::default());
        }
        host
    }

    pub fn set_command(&mut self, name: &str, base: impl Into<String>) {
        self.commands
            .insert(name.to_string(), CommandTemplate::new(base));
    }

    #[must_use]
    pub fn command(&self, name: &str) -> Option<&CommandTemplate> {
        self.commands.get(name)
    }

    #[must_use]
    pub fn render_command(&self, name: &str, target: &Path) -> Option<String> {
        self.commands.get(name).map(|cmd| cmd.render(target))
    }

    /// Run the emitter chain registered for `source`'s suffix.
    #[must_use]
    pub fn emit_object(&self, target: &Path, source: &Path) -> Emission {
        let emission = Emission::new(vec![target.to_path_buf()], vec![source.to_path_buf()]);
        match suffix_of(source).and_then(|suffix| self.emitters.get(&suffix)) {
            Some(chain) => chain.emit(emission),
            None => emission,
        }
    }
}

fn suffix_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
}

/// Record of what dispatch installation did to a [`HostEnv`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostChanges {
    pub commands: Vec<String>,
    pub env_set: BTreeMap<String, String>,
    pub env_removed: Vec<String>,
    pub ccflags_removed: Vec<String>,
    pub emitter_suffixes: Vec<String>,
}
