#![deny(clippy::all)]

pub mod commands;
pub mod config;
pub mod deferred;
pub mod dispatch;
pub mod effects;
mod errors;
mod outcome;
pub mod probe;
pub mod process;
pub mod setup;
pub mod toolchain;
pub mod wrapper;

pub use crate::commands::{
    fingerprint, probe as probe_command, render, setup_command, CommandContext,
    FingerprintRequest, ProbeRequest, RenderRequest, SetupRequest,
};
pub use crate::config::{DispatchConfig, EnvSnapshot};
pub use crate::effects::{Effects, SystemEffects};
pub use crate::errors::ConfigError;
pub use crate::outcome::{CommandStatus, ExecutionOutcome};
pub use crate::process::RunOutput;
pub use crate::setup::{setup, SetupReport};
