use atty::Stream;
use clap::Parser;
use color_eyre::Result;
use icewrap_core::{
    fingerprint, probe_command, render, setup_command, CommandContext, CommandStatus,
    ExecutionOutcome, FingerprintRequest, ProbeRequest, RenderRequest, SetupRequest,
};
use serde_json::{json, Value};

mod cli;
mod style;

use cli::{CommandCli, IcewrapCli};
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = IcewrapCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let ctx = CommandContext::new(cli.config.clone());
    let outcome = execute(&ctx, &cli.command)
        .unwrap_or_else(|err| ExecutionOutcome::from_error(&err));
    let code = emit_output(&cli, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("icewrap_cli={level},icewrap_core={level},icewrap_store={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn execute(ctx: &CommandContext, command: &CommandCli) -> anyhow::Result<ExecutionOutcome> {
    match command {
        CommandCli::Probe(args) => probe_command(
            ctx,
            &ProbeRequest {
                icecc: args.icecc.clone(),
                min_version: args.min_version.clone(),
            },
        ),
        CommandCli::Setup(args) => setup_command(
            ctx,
            &SetupRequest {
                icecc: args.icecc.clone(),
                toolchain: args.toolchain.clone(),
                addfile: args.addfile.clone(),
                addfile_remap: args
                    .addfile_remap
                    .chunks_exact(2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()))
                    .collect(),
                min_version: args.min_version.clone(),
                scheduler: args.scheduler.clone(),
                arch: args.arch.clone(),
                object_cache: args.object_cache,
                target_dir: args.target_dir.clone(),
                cc: args.cc.clone(),
                cxx: args.cxx.clone(),
                compiler_family: args.compiler_family.clone(),
            },
        ),
        CommandCli::Fingerprint(args) => fingerprint(
            ctx,
            &FingerprintRequest {
                package: args.package.clone(),
                id: args.id.clone(),
                target_dir: args.target_dir.clone(),
            },
        ),
        CommandCli::Render(args) => render(
            ctx,
            &RenderRequest {
                pointer: args.pointer.clone(),
                icecc: args.icecc.clone(),
                arch: args.arch.clone(),
                template: args.template.clone(),
                dest: args.dest.clone(),
            },
        ),
    }
}

fn command_name(command: &CommandCli) -> &'static str {
    match command {
        CommandCli::Probe(_) => "probe",
        CommandCli::Setup(_) => "setup",
        CommandCli::Fingerprint(_) => "fingerprint",
        CommandCli::Render(_) => "render",
    }
}

fn emit_output(cli: &IcewrapCli, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();
    let style = Style::new(cli.no_color, atty::is(Stream::Stdout));

    if cli.json {
        let payload = json!({
            "command": command_name(&cli.command),
            "status": status_name(outcome.status),
            "message": outcome.message,
            "details": outcome.details,
            "exit_code": code,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if outcome.status != CommandStatus::Ok {
        eprintln!("{}", style.status(outcome.status, &outcome.message));
    } else if !cli.quiet {
        println!("{}", style.status(outcome.status, &outcome.message));
        for (label, value) in summary_fields(&outcome.details) {
            println!("{}", style.field(label, &value));
        }
    }

    Ok(code)
}

fn status_name(status: CommandStatus) -> &'static str {
    match status {
        CommandStatus::Ok => "ok",
        CommandStatus::UserError => "user-error",
        CommandStatus::Failure => "failure",
    }
}

/// The few artifact paths worth showing after an active setup.
fn summary_fields(details: &Value) -> Vec<(&'static str, String)> {
    let Some(report) = details.get("report") else {
        return Vec::new();
    };
    [
        ("client", &["client_version"][..]),
        ("wrapper", &["wrapper", "path"][..]),
        ("fingerprint", &["fingerprint", "link"][..]),
        ("preprocess", &["preprocess"][..]),
    ]
    .into_iter()
    .filter_map(|(label, path)| {
        path.iter()
            .try_fold(report, |value, key| value.get(*key))
            .and_then(Value::as_str)
            .map(|value| (label, value.to_string()))
    })
    .collect()
}
