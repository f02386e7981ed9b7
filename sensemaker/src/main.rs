use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sensemaker::exit_codes;
use sensemaker::io::config::{EngineConfig, load_config, write_config};
use sensemaker::io::export::write_transcript_to;
use sensemaker::logging;
use sensemaker::replay::{SessionScript, replay};
use sensemaker::session::Terminal;

const DEFAULT_CONFIG: &str = "sensemaker.toml";

#[derive(Parser, Debug)]
#[command(
    name = "sensemaker",
    version,
    about = "Human-in-the-loop data-analysis agent engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Drive a session from a recorded script and print its outcome as JSON.
    Replay {
        /// Session script (JSON).
        session: PathBuf,
        /// Engine config (TOML). Defaults apply when the file is missing.
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Export directory, overriding `export.dir`.
        #[arg(long)]
        export: Option<PathBuf>,
        /// Also write the terminal transcript to this file.
        #[arg(long)]
        transcript: Option<PathBuf>,
    },
    /// Validate a config file.
    CheckConfig {
        #[arg(default_value = DEFAULT_CONFIG)]
        path: PathBuf,
    },
    /// Write a config file with every default spelled out.
    InitConfig {
        #[arg(default_value = DEFAULT_CONFIG)]
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Replay {
            session,
            config,
            export,
            transcript,
        } => cmd_replay(&session, &config, export, transcript.as_deref()),
        Command::CheckConfig { path } => cmd_check_config(&path),
        Command::InitConfig { path, force } => cmd_init_config(&path, force),
    }
}

fn cmd_replay(
    session: &Path,
    config: &Path,
    export: Option<PathBuf>,
    transcript: Option<&Path>,
) -> Result<i32> {
    let mut cfg = load_config(config)?;
    if export.is_some() {
        cfg.export.dir = export;
    }
    logging::init(&cfg.log_level);

    let script = SessionScript::load(session)?;
    let outcome = replay(script, &cfg)?;
    if let Some(path) = transcript
        && let Some(captured) = &outcome.transcript
    {
        write_transcript_to(path, captured)?;
    }
    let payload = serde_json::to_string_pretty(&outcome).context("serialize outcome")?;
    println!("{payload}");

    Ok(match outcome.terminal {
        Terminal::Accepted => exit_codes::OK,
        Terminal::Rejected => exit_codes::REJECTED,
        Terminal::Aborted => exit_codes::ABORTED,
    })
}

fn cmd_check_config(path: &Path) -> Result<i32> {
    if !path.exists() {
        bail!("config not found: {}", path.display());
    }
    let cfg = load_config(path)?;
    println!(
        "ok: max_iterations={} max_attempts={} strategy={:?}",
        cfg.max_iterations, cfg.max_attempts, cfg.execution.strategy
    );
    Ok(exit_codes::OK)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!("{} exists (use --force to overwrite)", path.display());
    }
    write_config(path, &EngineConfig::default())?;
    Ok(exit_codes::OK)
}
