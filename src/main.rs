//! agile-helper: start and stop workshop services from a console.
//!
//! This is the entry point of the application. It parses command-line
//! arguments, loads configuration, sets up logging and runs either the
//! interactive console or one of the one-shot commands.

mod app;
mod config;
mod error;
mod events;
mod process;
mod runner;
mod services;
mod tree;

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::app::{App, AppAction, HELP};
use crate::config::Config;
use crate::error::SupervisorError;
use crate::events::{Event, ServiceState, ShutdownSignal};
use crate::runner::ServiceSupervisor;
use crate::services::{ServiceKind, SpecOptions};

const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 3_000;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "agile-helper",
    version,
    about = "Start and stop workshop services",
    styles = help_styles(),
    color = clap::ColorChoice::Always,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Path to a config.toml file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore the default config file.
    #[arg(long)]
    no_config: bool,
    /// Interpreter for multi-line services (default: bash).
    #[arg(long)]
    shell: Option<String>,
    /// Working directory for services (default: home directory).
    #[arg(long)]
    home: Option<PathBuf>,
    /// Tracing filter (e.g. "debug" or "agile_helper=trace").
    #[arg(long)]
    log_level: Option<String>,
    /// Print service state changes as JSON lines.
    #[arg(long)]
    json: bool,
    /// How long to wait for services to stop when quitting (ms).
    #[arg(long)]
    shutdown_timeout_ms: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive console (default).
    Console,
    /// Run one service in the foreground until it exits or Ctrl-C.
    Run {
        #[arg(value_enum)]
        service: ServiceKind,
    },
    /// git add + commit + push.
    Commit {
        /// Commit message.
        #[arg(short, long)]
        message: Option<String>,
        /// Commit without a message without asking.
        #[arg(long)]
        yes: bool,
    },
    /// Print the commands each service runs.
    Show,
}

/// Runtime configuration derived from CLI arguments and the config file.
#[derive(Debug, Clone)]
struct RunSettings {
    spec_options: SpecOptions,
    log_filter: Option<String>,
    json: bool,
    shutdown_timeout: Duration,
}

impl RunSettings {
    fn from_cli(cli: &Cli, config: Config) -> Self {
        let spec_options = SpecOptions {
            shell: cli.shell.clone().or(config.shell),
            home: cli.home.clone().or(config.home),
        };
        let shutdown_timeout_ms = cli
            .shutdown_timeout_ms
            .or(config.shutdown_timeout_ms)
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_MS);
        Self {
            spec_options,
            log_filter: cli.log_level.clone().or(config.log),
            json: cli.json || config.json.unwrap_or(false),
            shutdown_timeout: Duration::from_millis(shutdown_timeout_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    init_tracing(settings.log_filter.as_deref())?;

    match cli.command.unwrap_or(Commands::Console) {
        Commands::Console => run_console(&settings).await,
        Commands::Run { service } => run_service(service, &settings).await,
        Commands::Commit { message, yes } => run_commit(message, yes, &settings).await,
        Commands::Show => show(&settings),
    }
}

fn load_settings(cli: &Cli) -> Result<RunSettings> {
    let config_path = if cli.no_config {
        None
    } else {
        cli.config.clone().or_else(config::default_config_path)
    };
    let config = match config_path {
        Some(path) => config::load_config(&path)?,
        None => Config::default(),
    };
    Ok(RunSettings::from_cli(cli, config))
}

// Explicit filter first, then RUST_LOG, then "info".
fn init_tracing(filter: Option<&str>) -> Result<()> {
    let filter = match filter {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter '{}'", directives))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}

async fn run_console(settings: &RunSettings) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let supervisors = build_supervisors(&settings.spec_options, &event_tx)?;
    let mut app = App::new();

    println!("{}", HELP);
    println!("{}", app::summary(&[]));
    spawn_stdin_listener(event_tx.clone());
    spawn_signal_listener(event_tx.clone());

    let mut shutdown_deadline: Option<tokio::time::Instant> = None;
    loop {
        let event = match shutdown_deadline {
            Some(deadline) => tokio::select! {
                event = event_rx.recv() => event,
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(
                        running = ?app.running(),
                        "services did not stop in time, exiting anyway"
                    );
                    break;
                }
            },
            None => event_rx.recv().await,
        };
        let Some(event) = event else {
            break;
        };

        match event {
            Event::Service { kind, state } => {
                if settings.json {
                    print_state_json(kind, state);
                }
                app.on_service_state(kind, state);
            }
            Event::CommitFinished { code } => app.on_commit_finished(code),
            Event::Input(line) => {
                let action = app.handle_line(&line);
                handle_app_action(
                    action,
                    &mut app,
                    &supervisors,
                    settings,
                    &event_tx,
                    &mut shutdown_deadline,
                );
            }
            Event::InputClosed => {
                tracing::debug!("stdin closed");
                begin_shutdown(&mut app, &supervisors, settings, &mut shutdown_deadline);
            }
            Event::Shutdown { signal } => {
                if app.is_shutting_down() {
                    tracing::warn!(?signal, "second shutdown signal, exiting now");
                    break;
                }
                tracing::info!(?signal, "shutdown requested");
                begin_shutdown(&mut app, &supervisors, settings, &mut shutdown_deadline);
            }
        }

        for line in app.take_output() {
            println!("{}", line);
        }
        if app.should_quit {
            break;
        }
    }
    Ok(())
}

fn build_supervisors(
    options: &SpecOptions,
    event_tx: &mpsc::UnboundedSender<Event>,
) -> Result<HashMap<ServiceKind, ServiceSupervisor>> {
    let mut supervisors = HashMap::new();
    for kind in ServiceKind::ALL {
        let supervisor = ServiceSupervisor::new(kind.spec(options)?);
        let tx = event_tx.clone();
        supervisor.set_observer(move |state| {
            let _ = tx.send(Event::Service { kind, state });
        });
        supervisors.insert(kind, supervisor);
    }
    Ok(supervisors)
}

fn handle_app_action(
    action: AppAction,
    app: &mut App,
    supervisors: &HashMap<ServiceKind, ServiceSupervisor>,
    settings: &RunSettings,
    event_tx: &mpsc::UnboundedSender<Event>,
    shutdown_deadline: &mut Option<tokio::time::Instant>,
) {
    match action {
        AppAction::Start(kind) => {
            if let Some(supervisor) = supervisors.get(&kind) {
                match supervisor.start() {
                    Ok(()) => tracing::debug!(
                        service = %kind,
                        pid = ?supervisor.pid(),
                        "started from console"
                    ),
                    Err(err) => report_error(app, &err),
                }
            }
        }
        AppAction::Stop(kind) => {
            if let Some(supervisor) = supervisors.get(&kind) {
                if let Err(err) = supervisor.stop() {
                    report_error(app, &err);
                }
            }
        }
        AppAction::Commit(message) => {
            match start_commit(message.as_deref(), &settings.spec_options, event_tx) {
                Ok(()) => app.on_commit_started(),
                Err(err) => app.on_commit_failed(&err.to_string()),
            }
        }
        AppAction::Shutdown => begin_shutdown(app, supervisors, settings, shutdown_deadline),
        AppAction::None => {}
    }
}

fn report_error(app: &mut App, err: &SupervisorError) {
    if err.is_precondition() {
        tracing::warn!(error = %err, "service precondition violated");
    }
    app.on_error(&err.to_string());
}

fn begin_shutdown(
    app: &mut App,
    supervisors: &HashMap<ServiceKind, ServiceSupervisor>,
    settings: &RunSettings,
    shutdown_deadline: &mut Option<tokio::time::Instant>,
) {
    for kind in app.begin_shutdown() {
        if let Some(supervisor) = supervisors.get(&kind) {
            if let Err(err) = supervisor.stop() {
                tracing::debug!(service = %kind, error = %err, "stop during shutdown");
            }
        }
    }
    if shutdown_deadline.is_none() {
        *shutdown_deadline = Some(tokio::time::Instant::now() + settings.shutdown_timeout);
    }
}

// The git handle lives only as long as its single run.
fn start_commit(
    message: Option<&str>,
    options: &SpecOptions,
    event_tx: &mpsc::UnboundedSender<Event>,
) -> Result<(), SupervisorError> {
    let supervisor = ServiceSupervisor::new(services::git_spec(message, options)?);
    supervisor.start()?;
    let tx = event_tx.clone();
    tokio::spawn(async move {
        let code = supervisor.wait_stopped().await;
        let _ = tx.send(Event::CommitFinished { code });
    });
    Ok(())
}

async fn run_service(kind: ServiceKind, settings: &RunSettings) -> Result<()> {
    let supervisor = ServiceSupervisor::new(kind.spec(&settings.spec_options)?);
    let json = settings.json;
    supervisor.set_observer(move |state| {
        if json {
            print_state_json(kind, state);
        }
        match state {
            ServiceState::Started => println!("{}", kind.started_message()),
            ServiceState::Stopped => println!("{}", kind.stopped_message()),
        }
    });
    supervisor.start()?;

    match supervise_foreground(&supervisor, settings.shutdown_timeout).await? {
        Some(0) => Ok(()),
        Some(code) => Err(anyhow!("{} exited with code {}", kind, code)),
        None => Err(anyhow!("{} was terminated", kind)),
    }
}

async fn run_commit(message: Option<String>, yes: bool, settings: &RunSettings) -> Result<()> {
    let has_message = message.as_deref().is_some_and(|m| !m.trim().is_empty());
    if !has_message && !yes && !ask("Are you sure you want to commit without message?")? {
        println!("Cancelled");
        return Ok(());
    }

    let supervisor =
        ServiceSupervisor::new(services::git_spec(message.as_deref(), &settings.spec_options)?);
    supervisor.start()?;
    println!("Commit in progress...");

    match supervise_foreground(&supervisor, settings.shutdown_timeout).await? {
        Some(0) => {
            println!("Commit performed !");
            Ok(())
        }
        Some(code) => Err(anyhow!("commit failed with code {}", code)),
        None => Err(anyhow!("commit was interrupted")),
    }
}

/// Waits for a started supervisor to finish, stopping it on Ctrl-C/SIGTERM.
async fn supervise_foreground(
    supervisor: &ServiceSupervisor,
    shutdown_timeout: Duration,
) -> Result<Option<i32>> {
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    spawn_signal_listener(signal_tx);

    tokio::select! {
        code = supervisor.wait_stopped() => return Ok(code),
        Some(event) = signal_rx.recv() => {
            tracing::info!(?event, service = supervisor.name(), "stopping on signal");
            if let Err(err) = supervisor.stop() {
                tracing::debug!(error = %err, "service already gone");
            }
        }
    }

    tokio::time::timeout(shutdown_timeout, supervisor.wait_stopped())
        .await
        .with_context(|| {
            format!(
                "{} did not stop within {:?}",
                supervisor.name(),
                shutdown_timeout
            )
        })
}

fn show(settings: &RunSettings) -> Result<()> {
    let options = &settings.spec_options;
    let mut specs = Vec::new();
    for kind in ServiceKind::ALL {
        specs.push(kind.spec(options)?);
    }
    specs.push(services::git_spec(Some("<message>"), options)?);

    for spec in specs {
        let dir = spec
            .working_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        let mode = if spec.is_single_command() { "exec" } else { "shell" };
        println!(
            "{:<8} {:<5} [{}] {}",
            spec.name(),
            mode,
            dir,
            spec.invocation().display()
        );
    }
    Ok(())
}

fn ask(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("failed to read answer")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_state_json(kind: ServiceKind, state: ServiceState) {
    let record = serde_json::json!({ "service": kind, "state": state });
    println!("{}", record);
}

fn spawn_signal_listener(tx: mpsc::UnboundedSender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            loop {
                let signal = tokio::select! {
                    _ = tokio::signal::ctrl_c() => ShutdownSignal::SigInt,
                    _ = sigterm.recv() => ShutdownSignal::SigTerm,
                };
                if tx.send(Event::Shutdown { signal }).is_err() {
                    break;
                }
            }
        }
        #[cfg(not(unix))]
        {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx
                    .send(Event::Shutdown {
                        signal: ShutdownSignal::SigInt,
                    })
                    .is_err()
                {
                    break;
                }
            }
        }
    });
}

fn spawn_stdin_listener(tx: mpsc::UnboundedSender<Event>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(Event::Input(line)).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read stdin");
                    break;
                }
            }
        }
        let _ = tx.send(Event::InputClosed);
    });
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_config() {
        let cli = Cli::parse_from([
            "agile-helper",
            "--shell",
            "sh",
            "--shutdown-timeout-ms",
            "250",
            "show",
        ]);
        let config = Config {
            shell: Some("zsh".to_string()),
            home: Some(PathBuf::from("/srv/student")),
            log: Some("debug".to_string()),
            json: Some(true),
            shutdown_timeout_ms: Some(9_000),
        };
        let settings = RunSettings::from_cli(&cli, config);
        assert_eq!(settings.spec_options.shell.as_deref(), Some("sh"));
        assert_eq!(settings.spec_options.home, Some(PathBuf::from("/srv/student")));
        assert_eq!(settings.log_filter.as_deref(), Some("debug"));
        assert!(settings.json);
        assert_eq!(settings.shutdown_timeout, Duration::from_millis(250));
    }

    #[test]
    fn defaults_without_config() {
        let cli = Cli::parse_from(["agile-helper"]);
        let settings = RunSettings::from_cli(&cli, Config::default());
        assert!(cli.command.is_none());
        assert!(settings.spec_options.shell.is_none());
        assert!(!settings.json);
        assert_eq!(
            settings.shutdown_timeout,
            Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS)
        );
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::parse_from(["agile-helper", "run", "tunnel"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Run {
                service: ServiceKind::Tunnel
            })
        ));
        let cli = Cli::parse_from(["agile-helper", "commit", "-m", "Step3 completed"]);
        match cli.command {
            Some(Commands::Commit { message, yes }) => {
                assert_eq!(message.as_deref(), Some("Step3 completed"));
                assert!(!yes);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn observers_forward_events_to_the_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = SpecOptions {
            shell: Some("sh".to_string()),
            home: Some(std::env::temp_dir()),
        };
        let supervisors = build_supervisors(&options, &tx).unwrap();
        assert_eq!(supervisors.len(), ServiceKind::ALL.len());

        // Stand-in for the OOP service, forwarding the same way.
        let stand_in = ServiceSupervisor::new(
            process::ServiceSpec::shell("stand-in", ["exit 0"])
                .unwrap()
                .with_shell("sh"),
        );
        let forward = tx.clone();
        stand_in.set_observer(move |state| {
            let _ = forward.send(Event::Service {
                kind: ServiceKind::Oop,
                state,
            });
        });
        stand_in.start().unwrap();
        stand_in.wait_stopped().await;

        let mut app = App::new();
        for _ in 0..2 {
            match rx.recv().await {
                Some(Event::Service { kind, state }) => app.on_service_state(kind, state),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(
            app.take_output(),
            vec![
                "OOP service launched",
                "Running : OOP service",
                "OOP service killed",
                "No service running",
            ]
        );
    }
}
