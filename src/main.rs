//! CLI entry point for lazyfetch.

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use lazyfetch_core::env::EnvReport;
use lazyfetch_core::{Fields, Method, Session, SessionConfig};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    if matches!(args.command, Command::Env) {
        let cwd = std::env::current_dir().context("cannot read working directory")?;
        let report = EnvReport::collect(&cwd);
        print_json(&report)?;
        if !report.is_ready() {
            warn!("working directories are missing or not writable");
        }
        return Ok(());
    }

    let mut session = build_session(&args)?;
    let outcome = run_command(&mut session, args.command).await;
    let closed = session.close().context("failed to write cookie jar");
    outcome?;
    closed
}

fn build_session(args: &Args) -> Result<Session> {
    let mut config = SessionConfig {
        verify_tls: !args.insecure,
        max_redirects: args.max_redirects,
        cookie_file: args.cookie_file.clone(),
        cookie_jar: args.cookie_jar.clone(),
        ..SessionConfig::default()
    };
    if let Some(secs) = args.connect_timeout {
        config.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.timeout {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(user_agent) = &args.user_agent {
        config.user_agent.clone_from(user_agent);
    }

    let mut session = Session::with_config(config).context("failed to build HTTP client")?;
    if args.send_cookies {
        if let Err(warning) = session.set_send_cookies(true) {
            warn!(%warning, "send-cookies ignored");
        }
    }
    for warning in session.config_warnings() {
        warn!(%warning, "configuration adjusted");
    }
    Ok(session)
}

async fn run_command(session: &mut Session, command: Command) -> Result<()> {
    match command {
        Command::Get {
            url,
            head,
            show_log,
        } => {
            if head {
                for warning in session.set_opt([lazyfetch_core::Setting::NoBody(true)]) {
                    warn!(%warning, "HEAD not applied");
                }
            }
            session.exec(&url, Method::GET, &Fields::new(), &[]).await;
            finish_exec(session, head, show_log)
        }
        Command::Post {
            url,
            json,
            field,
            method,
            show_log,
        } => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("invalid method '{method}'"))?;
            let fields = match json {
                Some(json) => {
                    let value: serde_json::Value =
                        serde_json::from_str(&json).context("--json is not valid JSON")?;
                    Fields::from_json(&value)?
                }
                None => Fields::from_pairs(&field)?,
            };
            let manifest = file_manifest(&field);
            debug!(?manifest, "file fields");
            session.exec(&url, method, &fields, &manifest).await;
            finish_exec(session, false, show_log)
        }
        Command::Download {
            url,
            output_dir,
            name,
            overwrite,
        } => {
            let path = session
                .download(&url, output_dir.as_deref(), name.as_deref(), overwrite)
                .await?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Upload {
            file,
            remote,
            name,
            overwrite,
        } => {
            let remote = session
                .upload(Path::new(&file), &remote, name.as_deref(), overwrite)
                .await?;
            println!("{remote}");
            Ok(())
        }
        Command::Cookies { urls } => {
            for url in &urls {
                session.exec(url, Method::GET, &Fields::new(), &[]).await;
                info!(status = session.status(), "fetched");
                for warning in &session.log().warnings {
                    warn!(%warning, "request problem");
                }
            }
            print_json(&session.cookies())
        }
        Command::Env => Ok(()),
    }
}

/// Prints the outcome of one exec and fails when nothing was received.
fn finish_exec(session: &Session, headers_only: bool, show_log: bool) -> Result<()> {
    for warning in &session.log().warnings {
        warn!(%warning, "request problem");
    }
    let mut out = io::stdout().lock();
    if headers_only {
        for hop in session.hops() {
            for line in &hop.lines {
                writeln!(out, "{line}")?;
            }
            writeln!(out)?;
        }
    } else {
        out.write_all(session.data())?;
    }
    out.flush()?;
    drop(out);

    if show_log {
        print_json(session.log())?;
    }
    if session.status() == 0 {
        bail!("request failed: {}", session.text());
    }
    info!(status = session.status(), "request complete");
    Ok(())
}

/// `-F` values that reference a file. `--json` data never attaches files.
fn file_manifest(pairs: &[String]) -> Vec<String> {
    pairs
        .iter()
        .filter_map(|pair| pair.split_once('='))
        .map(|(_, value)| value)
        .filter(|value| value.starts_with(lazyfetch_core::form::FILE_SENTINEL))
        .map(str::to_string)
        .collect()
}


fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{text}");
    Ok(())
}
