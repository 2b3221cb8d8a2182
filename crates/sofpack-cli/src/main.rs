mod commands;

use clap::Parser;
use sofpack_core::{install_signal_handler, BuildOptions, Builder};
use sofpack_runtime::{CancelToken, ProcessExecutor, Toolchain};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "sofpack",
    version,
    about = "Reproducible SOF firmware and topology bundle packager"
)]
struct Cli {
    /// Build config: `.toml`, or protobuf text format for any other extension.
    config: PathBuf,

    /// Check out this revision instead of the config's `commit`.
    #[arg(long, value_name = "REV")]
    commit: Option<String>,

    /// Directory for the archive, config snapshot, and manifest.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    outdir: PathBuf,

    /// Keep the scratch build directory and print its path.
    #[arg(long, default_value_t = false)]
    keep_build_dir: bool,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false)]
    trace: bool,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SOFPACK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelToken::new();
    install_signal_handler(cancel.clone());

    let options = BuildOptions {
        out_dir: cli.outdir,
        commit_override: cli.commit,
        keep_build_dir: cli.keep_build_dir,
        check_prereqs: std::env::var("SOFPACK_SKIP_PREREQS").as_deref() != Ok("1"),
        toolchain: Toolchain::from_env(),
    };
    let builder = Builder::new(Box::new(ProcessExecutor::new(cancel)), options);
    let progress = !(cli.json || cli.verbose || cli.trace);

    match commands::build::run(&builder, &cli.config, cli.json, progress) {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            let mut stderr = std::io::stderr().lock();
            if let Some(output) = failure.tool_output.as_deref().filter(|o| !o.is_empty()) {
                let _ = stderr.write_all(output);
                if !output.ends_with(b"\n") {
                    let _ = stderr.write_all(b"\n");
                }
            }
            let _ = writeln!(stderr, "error: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}
