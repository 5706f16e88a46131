use anyhow::{Context, Result, bail};
use chunkscribe::audio::AudioInput;
use chunkscribe::cli::{Cli, Commands, ConfigAction, JobArgs};
use chunkscribe::config::Config;
use chunkscribe::daemon::{create_transcriber, resolve_socket_path, run_daemon};
use chunkscribe::ipc::client::{follow_job, send_command};
use chunkscribe::ipc::protocol::{Command, Response};
use chunkscribe::job::types::{JobId, JobStatus, MergedTranscript};
use chunkscribe::orchestrator::Orchestrator;
use chunkscribe::output;
use chunkscribe::planner::plan_windows;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Transcribe {
            file,
            job,
            model,
            json,
            timestamps,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(model) = model {
                config.stt.model = model;
            }
            let show_progress = !cli.quiet && std::io::stderr().is_terminal();
            run_transcribe(
                config,
                &file,
                &job,
                TranscriptFormat { json, timestamps },
                show_progress,
                cli.verbose > 0,
            )
            .await?;
        }
        Commands::Plan { duration, job } => {
            let config = load_config(cli.config.as_deref())?;
            let job_config = job.apply(config.job);
            job_config.validate()?;
            let windows = plan_windows(
                duration,
                job_config.chunk_duration_secs,
                job_config.overlap_secs,
            )?;
            print!("{}", output::format_windows(&windows));
        }
        Commands::Daemon { socket } => {
            let config = load_config(cli.config.as_deref())?;
            run_daemon(config, socket).await?;
        }
        Commands::Submit {
            file,
            job,
            follow,
            temporary,
            socket,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let socket_path = resolve_socket_path(&config, socket);
            // The daemon resolves relative paths against its own directory.
            let path = std::path::absolute(&file)
                .with_context(|| format!("Failed to resolve {}", file.display()))?;
            let job_config = (!job.is_empty()).then(|| job.apply(config.job.clone()));

            let response = request(
                &socket_path,
                Command::Submit {
                    path,
                    config: job_config,
                    temporary,
                },
            )
            .await;
            if let Response::Submitted { job_id } = response {
                println!("{}", job_id);
                if follow {
                    handle_follow(&socket_path, job_id, cli.verbose > 0).await?;
                }
            } else {
                print_response(response, TranscriptFormat::default());
            }
        }
        Commands::Status {
            job_id,
            json,
            socket,
        } => {
            let socket_path = ipc_socket(cli.config.as_deref(), socket)?;
            let response = request(&socket_path, Command::Progress { job_id }).await;
            match response {
                Response::Progress { progress } if json => {
                    println!("{}", serde_json::to_string_pretty(&progress)?);
                }
                other => print_response(other, TranscriptFormat::default()),
            }
        }
        Commands::Cancel { job_id, socket } => {
            let socket_path = ipc_socket(cli.config.as_deref(), socket)?;
            let response = request(&socket_path, Command::Cancel { job_id }).await;
            print_response(response, TranscriptFormat::default());
        }
        Commands::Result {
            job_id,
            json,
            timestamps,
            socket,
        } => {
            let socket_path = ipc_socket(cli.config.as_deref(), socket)?;
            let response = request(&socket_path, Command::Result { job_id }).await;
            print_response(response, TranscriptFormat { json, timestamps });
        }
        Commands::Follow { job_id, socket } => {
            let socket_path = ipc_socket(cli.config.as_deref(), socket)?;
            handle_follow(&socket_path, job_id, cli.verbose > 0).await?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "chunkscribe",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Install the log subscriber. `RUST_LOG` wins over `-q`/`-v`.
fn init_tracing(quiet: bool, verbose: u8) {
    let default = match (quiet, verbose) {
        (true, _) => "chunkscribe=warn",
        (false, 0) => "chunkscribe=info",
        (false, 1) => "chunkscribe=debug",
        (false, _) => "chunkscribe=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/chunkscribe/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn ipc_socket(custom_path: Option<&Path>, socket: Option<PathBuf>) -> Result<PathBuf> {
    let config = load_config(custom_path)?;
    Ok(resolve_socket_path(&config, socket))
}

#[derive(Debug, Clone, Copy, Default)]
struct TranscriptFormat {
    json: bool,
    timestamps: bool,
}

fn print_transcript(transcript: &MergedTranscript, format: TranscriptFormat) -> Result<()> {
    if format.json {
        println!("{}", serde_json::to_string_pretty(transcript)?);
    } else {
        let color = std::io::stdout().is_terminal();
        let text = output::format_transcript(transcript, format.timestamps, color);
        if text.ends_with('\n') {
            print!("{}", text);
        } else {
            println!("{}", text);
        }
    }
    if transcript.degraded {
        eprintln!(
            "{}",
            "Warning: segment order was inconsistent; transcript assembled in chunk order".yellow()
        );
    }
    Ok(())
}

/// Run one job in this process and print its transcript.
async fn run_transcribe(
    config: Config,
    file: &Path,
    job: &JobArgs,
    format: TranscriptFormat,
    show_progress: bool,
    verbose: bool,
) -> Result<()> {
    let job_config = job.apply(config.job.clone());
    job_config.validate()?;

    let path = file.to_path_buf();
    let audio = tokio::task::spawn_blocking(move || AudioInput::from_path(&path))
        .await?
        .with_context(|| format!("Failed to load {}", file.display()))?;

    let transcriber = create_transcriber(&config).await?;
    let orchestrator = Orchestrator::new(transcriber, &config)?;

    let mut events = orchestrator.subscribe();
    let job_id = orchestrator.create_job(audio, job_config).await?;

    let renderer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if show_progress {
                        output::render_event(&event, verbose);
                    }
                    if event.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let progress = tokio::select! {
        progress = orchestrator.wait_for_terminal(job_id) => progress?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(%job_id, "interrupted, cancelling job");
            orchestrator.cancel_job(job_id).await?;
            orchestrator.wait_for_terminal(job_id).await?
        }
    };
    if let Err(e) = renderer.await {
        tracing::debug!(error = %e, "progress renderer failed");
    }

    match progress.status {
        JobStatus::Completed => {
            let transcript = orchestrator.get_job_result(job_id).await?;
            print_transcript(&transcript, format)
        }
        JobStatus::Failed => match progress.error {
            Some(error) => bail!("Transcription failed: {}", error),
            None => bail!("Transcription failed"),
        },
        status => {
            eprintln!("{}", format!("Job {}", status).yellow());
            std::process::exit(130);
        }
    }
}

/// Send a command, exiting with a hint when the daemon is unreachable.
async fn request(socket_path: &Path, command: Command) -> Response {
    match send_command(socket_path, command).await {
        Ok(response) => response,
        Err(e) => {
            eprintln!(
                "{}",
                format!("Failed to communicate with daemon: {}", e).red()
            );
            eprintln!("Is the daemon running? Start it with: chunkscribe daemon");
            std::process::exit(1);
        }
    }
}

fn print_response(response: Response, format: TranscriptFormat) {
    let printed = match response {
        Response::Submitted { job_id } => {
            println!("{}", job_id);
            Ok(())
        }
        Response::Progress { progress } => {
            print!("{}", output::format_progress(&progress));
            Ok(())
        }
        Response::Cancelled { job_id, status } => {
            println!("{} {}", job_id, status.green());
            Ok(())
        }
        Response::Transcript { transcript, .. } => print_transcript(&transcript, format),
        Response::Event { event } => {
            output::render_event(&event, true);
            Ok(())
        }
        Response::Ok => {
            println!("{}", "ok".green());
            Ok(())
        }
        Response::Error { code, message } => {
            eprintln!("{}", format!("Error ({}): {}", code, message).red());
            std::process::exit(1);
        }
    };
    if let Err(e) = printed {
        eprintln!("{}", format!("Error: {}", e).red());
        std::process::exit(1);
    }
}

/// Follow a job and render its events until it finishes.
async fn handle_follow(socket_path: &Path, job_id: JobId, verbose: bool) -> Result<()> {
    let last = match follow_job(socket_path, job_id, |response| {
        if let Response::Event { event } = response {
            output::render_event(event, verbose);
        }
    })
    .await
    {
        Ok(last) => last,
        Err(e) => {
            eprintln!("Failed to follow job: {}", e);
            eprintln!("Is the daemon running? Start it with: chunkscribe daemon");
            std::process::exit(1);
        }
    };

    if let Response::Error { .. } = last {
        print_response(last, TranscriptFormat::default());
    }
    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&config_path, Config::default().to_toml()?)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            println!("Wrote {}", config_path.display().green());
        }
    }
    Ok(())
}
