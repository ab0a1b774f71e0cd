//! Rewriting host build state so compiles go through `run-icecc`.

use std::{path::PathBuf, sync::Arc};

use serde::Serialize;
use tracing::debug;

mod emitter;
mod host;
mod preprocess;
mod template;

pub use emitter::{Emission, Emitter, EmitterChain, ToolchainDependencyEmitter, TOOLCHAIN_DEPENDENCY};
pub use host::{
    object_suffixes, HostChanges, HostEnv, COMPILE_COMMANDS, CXX_SUFFIXES, C_SUFFIXES,
    THROTTLED_COMMANDS,
};
pub use preprocess::{select_preprocess_mode, PreprocessMode};
pub use template::{is_probe_target, CommandTemplate, Prefix, CONFTEST_MARKER};

use preprocess::set_env;

/// Everything `install_dispatch` needs, already resolved to absolute paths.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchPlan {
    pub wrapper: PathBuf,
    /// `None` leaves non-compile commands untouched.
    pub icerun: Option<PathBuf>,
    pub scheduler: Option<String>,
    pub object_cache_active: bool,
}

/// Route compiles through the wrapper and throttle the rest.
pub fn install_dispatch(host: &mut HostEnv, plan: &DispatchPlan) -> HostChanges {
    let mut changes = HostChanges::default();

    let dependency: Arc<dyn Emitter> = Arc::new(ToolchainDependencyEmitter::new(&plan.wrapper));
    for suffix in object_suffixes() {
        let Some(chain) = host.emitters.get_mut(suffix) else {
            continue;
        };
        if chain.install(Arc::clone(&dependency)) {
            changes.emitter_suffixes.push(suffix.to_string());
        }
    }

    if let Some(scheduler) = &plan.scheduler {
        set_env(host, &mut changes, "USE_SCHEDULER", scheduler);
    }

    if plan.object_cache_active {
        // The cache runs the compiler itself and expects the launcher in its prefix.
        set_env(
            host,
            &mut changes,
            "CCACHE_PREFIX",
            &plan.wrapper.display().to_string(),
        );
    } else {
        let remote = Prefix::RemoteCompile {
            wrapper: plan.wrapper.clone(),
        };
        prefix_commands(host, COMPILE_COMMANDS, &remote, &mut changes);
    }

    if let Some(icerun) = &plan.icerun {
        let throttle = Prefix::Throttle {
            icerun: icerun.clone(),
        };
        prefix_commands(host, THROTTLED_COMMANDS, &throttle, &mut changes);
    }

    debug!(commands = ?changes.commands, env = ?changes.env_set, "dispatch installed");
    changes
}

fn prefix_commands(host: &mut HostEnv, names: &[&str], prefix: &Prefix, changes: &mut HostChanges) {
    for name in names {
        if let Some(command) = host.commands.get_mut(*name) {
            if command.install_prefix(prefix.clone()) {
                changes.commands.push((*name).to_string());
            }
        }
    }
}
