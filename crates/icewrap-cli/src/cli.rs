use std::path::PathBuf;

use clap::{value_parser, ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    disable_help_subcommand = true,
    about = "Dispatch C/C++ compiles to an icecream pool with a fingerprinted toolchain",
    after_help = "Examples:\n  icewrap probe\n  icewrap setup --toolchain derive --scheduler sched.local\n  icewrap --json fingerprint env.tar.gz\n"
)]
#[allow(clippy::struct_excessive_bools)]
pub struct IcewrapCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[arg(
        long,
        value_parser = value_parser!(PathBuf),
        help = "Config file (defaults to ./icewrap.toml when present)",
        global = true
    )]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(
        about = "Report whether a usable icecream client is installed.",
        override_usage = "icewrap probe [--icecc PATH] [--min-version VERSION]"
    )]
    Probe(ProbeArgs),
    #[command(
        about = "Package the toolchain, write run-icecc, and report the dispatch changes.",
        after_help = "Examples:\n  icewrap setup\n  ICECC_VERSION=https://mirror/env.tar.gz icewrap setup\n  icewrap setup --addfile /etc/ld.so.conf --object-cache\n"
    )]
    Setup(SetupArgs),
    #[command(
        about = "Stabilize an archive and publish its content fingerprint.",
        override_usage = "icewrap fingerprint <PACKAGE> [--id ID] [--target-dir DIR]"
    )]
    Fingerprint(FingerprintArgs),
    #[command(about = "Render run-icecc from an existing fingerprint pointer file.")]
    Render(RenderArgs),
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[arg(long, help = "icecream client to probe (name or path)")]
    pub icecc: Option<String>,
    #[arg(long, value_name = "VERSION", help = "Oldest acceptable client version")]
    pub min_version: Option<String>,
}

#[derive(Args, Debug)]
pub struct SetupArgs {
    #[arg(long, help = "icecream client to drive (name or path)")]
    pub icecc: Option<String>,
    #[arg(
        long,
        value_name = "SOURCE",
        help = "Toolchain archive: URL, local path, or 'derive'"
    )]
    pub toolchain: Option<String>,
    #[arg(
        long,
        value_name = "PATH|DEST=SOURCE",
        help = "Extra file to embed in a derived toolchain (repeatable)"
    )]
    pub addfile: Vec<String>,
    #[arg(
        long,
        num_args = 2,
        value_names = ["DEST", "SOURCE"],
        help = "Embed SOURCE at DEST in a derived toolchain; paths may contain '=' (repeatable)"
    )]
    pub addfile_remap: Vec<PathBuf>,
    #[arg(long, value_name = "VERSION", help = "Oldest acceptable client version")]
    pub min_version: Option<String>,
    #[arg(long, help = "Scheduler host exported as USE_SCHEDULER")]
    pub scheduler: Option<String>,
    #[arg(long, help = "Architecture prefix for ICECC_VERSION")]
    pub arch: Option<String>,
    #[arg(long, help = "Treat the object cache as active")]
    pub object_cache: bool,
    #[arg(long, value_parser = value_parser!(PathBuf), help = "Directory for generated artifacts")]
    pub target_dir: Option<PathBuf>,
    #[arg(long, help = "C compiler")]
    pub cc: Option<String>,
    #[arg(long, help = "C++ compiler")]
    pub cxx: Option<String>,
    #[arg(long, value_name = "FAMILY", help = "Override compiler family detection (clang, gcc)")]
    pub compiler_family: Option<String>,
}

#[derive(Args, Debug)]
pub struct FingerprintArgs {
    #[arg(value_parser = value_parser!(PathBuf))]
    pub package: PathBuf,
    #[arg(long, help = "Version identifier (defaults to user_provided.<file name>)")]
    pub id: Option<String>,
    #[arg(long, value_parser = value_parser!(PathBuf), help = "Directory for generated artifacts")]
    pub target_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    #[arg(long, value_parser = value_parser!(PathBuf), help = "Pointer file naming the fingerprinted archive")]
    pub pointer: PathBuf,
    #[arg(long, value_parser = value_parser!(PathBuf), help = "Absolute path of the icecream client")]
    pub icecc: PathBuf,
    #[arg(long, help = "Architecture prefix for ICECC_VERSION")]
    pub arch: Option<String>,
    #[arg(long, value_parser = value_parser!(PathBuf), help = "Custom wrapper template")]
    pub template: Option<PathBuf>,
    #[arg(long, value_parser = value_parser!(PathBuf), help = "Where to write the wrapper")]
    pub dest: PathBuf,
}
