//! devrack: a local dev-server manager with an AI-assisted terminal.
//!
//! This is the entry point of the application. It parses command-line
//! arguments, resolves settings, and either runs one of the headless
//! subcommands or drives the TUI event loop.

mod ai;
mod ansi;
mod app;
mod config;
mod error;
mod events;
mod inspect;
mod interceptor;
mod manager;
mod output;
mod ports;
mod project;
mod reconcile;
mod registry;
mod store;
mod supervisor;
mod terminal;
mod tui;

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::ai::CliBackend;
use crate::app::{App, AppAction};
use crate::config::{find_config, load_config, Config, Settings};
use crate::events::{Event, EventSink};
use crate::inspect::SystemInspector;
use crate::manager::Manager;
use crate::output::StreamKind;
use crate::project::{preferred_script, Project};
use crate::store::{JsonStore, ProjectStore};
use crate::supervisor::{LaunchCommand, StartOptions};

const EVENT_CAPACITY: usize = 256;
const TICK_INTERVAL: Duration = Duration::from_millis(150);
const STATUS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(
    name = "devrack",
    version,
    about = "Local dev-server manager with an AI-assisted terminal",
    styles = help_styles(),
    color = clap::ColorChoice::Always,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Path to devrack.toml configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Ignore any devrack.toml.
    #[arg(long, global = true)]
    no_config: bool,
    /// Path of the project store (JSON).
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Port offered to dev servers when none is requested.
    #[arg(long, global = true)]
    default_port: Option<u16>,
    /// Max output lines kept per project.
    #[arg(long, global = true)]
    max_lines: Option<usize>,
    /// Shell used by the terminal pane.
    #[arg(long)]
    shell: Option<String>,
    /// Executable of the AI CLI.
    #[arg(long)]
    ai_command: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List tracked projects.
    List,
    /// Track a project directory.
    Add {
        path: PathBuf,
        /// Display name (defaults to the directory name).
        #[arg(long)]
        name: Option<String>,
        /// Clone origin, "local" when omitted.
        #[arg(long)]
        url: Option<String>,
    },
    /// Stop tracking a project.
    Remove {
        path: PathBuf,
        /// Also delete the project directory.
        #[arg(long)]
        delete_files: bool,
    },
    /// Detect running dev servers and print every project's status.
    Status,
    /// Start a project's dev server in the foreground.
    Run {
        path: PathBuf,
        /// npm script to run for node projects.
        #[arg(long)]
        script: Option<String>,
        /// Preferred port.
        #[arg(long)]
        port: Option<u16>,
        /// Custom launch command instead of the one for the project kind.
        #[arg(long = "cmd")]
        command: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    let _log_guard = init_logging(cli.command.is_none())?;

    match cli.command {
        None => run_tui(settings).await,
        Some(Commands::List) => list_projects(&settings),
        Some(Commands::Add { path, name, url }) => add_project(&settings, &path, name, url),
        Some(Commands::Remove { path, delete_files }) => {
            remove_project(settings, &path, delete_files).await
        }
        Some(Commands::Status) => print_status(settings).await,
        Some(Commands::Run {
            path,
            script,
            port,
            command,
        }) => run_headless(settings, &path, script, port, command).await,
    }
}

/// Config file first, then command-line overrides.
fn load_settings(cli: &Cli) -> Result<Settings> {
    let config = if cli.no_config {
        Config::default()
    } else {
        match find_config(cli.config.as_deref()) {
            Some(path) => load_config(&path)?,
            None => Config::default(),
        }
    };
    let mut settings = Settings::from_config(config);
    if let Some(store) = &cli.store {
        settings.store = store.clone();
    }
    if let Some(port) = cli.default_port {
        settings.default_port = port;
    }
    if let Some(max_lines) = cli.max_lines {
        settings.max_lines = max_lines;
    }
    if let Some(shell) = &cli.shell {
        settings.shell = shell.clone();
    }
    if let Some(command) = &cli.ai_command {
        settings.ai_command = command.clone();
    }
    Ok(settings)
}

/// The TUI owns the screen, so it logs to a file; subcommands log to stderr.
fn init_logging(to_file: bool) -> Result<Option<WorkerGuard>> {
    let debug_enabled = std::env::var("DEVRACK_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if !to_file {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        return Ok(None);
    }

    let dir = config::data_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::never(&dir, "devrack.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Ok(Some(guard))
}

fn build_manager(settings: Settings) -> Result<(Manager, EventSink, mpsc::Receiver<Event>)> {
    let store = JsonStore::open(settings.store.clone())?;
    let (events, rx) = events::channel(EVENT_CAPACITY);
    let backend = Arc::new(CliBackend::new(
        settings.ai_command.clone(),
        settings.ai_args.clone(),
    ));
    let manager = Manager::new(
        settings,
        Box::new(store),
        Arc::new(SystemInspector),
        backend,
        events.clone(),
    );
    Ok((manager, events, rx))
}

/// Absolute form of a user-supplied project path.
fn resolve_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn format_project_row(project: &Project) -> String {
    let port = project
        .port
        .map(|port| port.to_string())
        .unwrap_or_else(|| "-".into());
    let branch = project.branch.as_deref().unwrap_or("-");
    format!(
        "{:<20} {:<8} {:<6} {:<8} {:<12} {}",
        project.name,
        project.status.label(),
        port,
        project.kind.label(),
        branch,
        project.path.display()
    )
}

fn print_projects(projects: &[Project], store: &Path) {
    if projects.is_empty() {
        println!("No projects in {}", store.display());
        return;
    }
    println!(
        "{:<20} {:<8} {:<6} {:<8} {:<12} PATH",
        "NAME", "STATUS", "PORT", "TYPE", "BRANCH"
    );
    for project in projects {
        println!("{}", format_project_row(project));
    }
}

fn list_projects(settings: &Settings) -> Result<()> {
    let store = JsonStore::open(settings.store.clone())?;
    print_projects(&store.list(), store.path());
    Ok(())
}

fn add_project(
    settings: &Settings,
    path: &Path,
    name: Option<String>,
    url: Option<String>,
) -> Result<()> {
    let path = std::fs::canonicalize(path)
        .with_context(|| format!("project directory {} not found", path.display()))?;
    if !path.is_dir() {
        bail!("{} is not a directory", path.display());
    }
    let mut project = Project::from_path(&path);
    if let Some(name) = name {
        project.name = name;
    }
    if let Some(url) = url {
        project.url = url;
    }

    let mut store = JsonStore::open(settings.store.clone())?;
    let before = store.list().len();
    let projects = store.add(project.clone())?;
    if projects.len() == before {
        println!("{} is already tracked", path.display());
    } else {
        println!("Added {} ({}) at {}", project.name, project.kind, path.display());
    }
    Ok(())
}

async fn remove_project(settings: Settings, path: &Path, delete_files: bool) -> Result<()> {
    let path = resolve_path(path);
    let (mut manager, _events, _rx) = build_manager(settings)?;
    if manager.project(&path).is_none() {
        bail!("{} is not tracked", path.display());
    }
    manager.remove_project(&path, delete_files).await?;
    manager.shutdown().await;
    if delete_files {
        println!("Removed {} and deleted its files", path.display());
    } else {
        println!("Removed {}", path.display());
    }
    Ok(())
}

async fn print_status(settings: Settings) -> Result<()> {
    let store_path = settings.store.clone();
    let (mut manager, _events, mut rx) = build_manager(settings)?;
    if !manager.projects().is_empty() {
        manager.check_all_statuses();
        let observed = tokio::time::timeout(STATUS_TIMEOUT, async {
            while let Some(event) = rx.recv().await {
                let done = match event {
                    Event::Observed(_) => Some(true),
                    Event::ScanFailed => Some(false),
                    _ => None,
                };
                manager.handle_event(event).await;
                if let Some(observed) = done {
                    return observed;
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        if !observed {
            warn!("process scan did not complete, showing stored statuses");
        }
    }
    print_projects(&manager.projects(), &store_path);
    Ok(())
}

async fn run_headless(
    settings: Settings,
    path: &Path,
    script: Option<String>,
    port: Option<u16>,
    command: Option<String>,
) -> Result<()> {
    let path = std::fs::canonicalize(path)
        .with_context(|| format!("project directory {} not found", path.display()))?;
    let command = match command.as_deref() {
        Some(line) => match LaunchCommand::parse(line) {
            Some(command) => Some(command),
            None => bail!("invalid launch command `{}`", line),
        },
        None => None,
    };
    let (mut manager, events, mut rx) = build_manager(settings)?;
    if manager.project(&path).is_none() {
        manager.add_project(Project::from_path(&path))?;
    }

    let script = script.or_else(|| manager.project(&path).and_then(|p| preferred_script(&p)));

    spawn_signal_listener(events.sender());
    let options = StartOptions { port, command };
    let started = manager.start_with(&path, script.as_deref(), options).await;
    if manager.is_supervised(&path) {
        spawn_stdin_listener(events.sender());
    }

    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut exit_code = None;
    loop {
        if !manager.is_supervised(&path) && rx.is_empty() {
            break;
        }
        tokio::select! {
            Some(event) = rx.recv() => match event {
                Event::Output { project, text, stream } if project == path => {
                    let result = match stream {
                        StreamKind::Stdout => stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()),
                        StreamKind::Stderr => stderr.write_all(text.as_bytes()).and_then(|_| stderr.flush()),
                    };
                    if result.is_err() {
                        break;
                    }
                }
                Event::Stdin(bytes) => manager.send_to_server(&path, &bytes).await,
                Event::Shutdown => {
                    info!(project = %path.display(), "interrupted, stopping");
                    manager.stop(&path).await?;
                }
                Event::ProcessExited { code, .. } => exit_code = code,
                other => {
                    manager.handle_event(other).await;
                }
            },
            _ = ticker.tick() => manager.tick(),
        }
    }
    manager.shutdown().await;
    started?;

    match exit_code {
        Some(0) | None => Ok(()),
        Some(code) => bail!("dev server exited with code {}", code),
    }
}

async fn run_tui(settings: Settings) -> Result<()> {
    let drain_interval = settings.drain_interval;
    let reconcile_interval = settings.reconcile_interval;
    let (mut manager, events, mut rx) = build_manager(settings)?;
    info!(projects = manager.projects().len(), "devrack started");

    let mut terminal = tui::init_terminal().context("failed to initialise terminal")?;
    spawn_input_listener(events.sender());
    spawn_signal_listener(events.sender());

    let mut app = App::new();
    manager.check_all_statuses();

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut drain = tokio::time::interval(drain_interval);
    let mut reconcile = tokio::time::interval(reconcile_interval);
    // The first tick fires immediately and a scan is already running.
    reconcile.tick().await;

    let mut result = Ok(());
    loop {
        let mut redraw = false;
        tokio::select! {
            Some(event) = rx.recv() => match event {
                Event::Key(key) => {
                    let action = app.handle_key(key, manager.mode());
                    handle_app_action(action, &mut app, &mut manager).await;
                    redraw = true;
                }
                Event::Resize { .. } => redraw = true,
                Event::Shutdown => app.should_quit = true,
                Event::ProcessExited { project, code } => {
                    let name = manager
                        .project(&project)
                        .map(|project| project.name)
                        .unwrap_or_else(|| project.display().to_string());
                    match code {
                        Some(0) => app.set_status_message(format!("{} exited", name)),
                        Some(code) => app.set_status_warning(format!("{} exited with code {}", name, code)),
                        None => app.set_status_warning(format!("{} was terminated", name)),
                    }
                    redraw = true;
                }
                other => redraw = manager.handle_event(other).await,
            },
            _ = ticker.tick() => {
                manager.tick();
                redraw = true;
            }
            _ = drain.tick() => redraw = manager.drain_ai().await,
            _ = reconcile.tick() => manager.check_all_statuses(),
        }

        if app.should_quit {
            break;
        }
        if redraw {
            if let Err(err) = tui::draw(&mut app, &manager, &mut terminal) {
                result = Err(err).context("failed to draw");
                break;
            }
        }
    }

    manager.shutdown().await;
    tui::restore_terminal(terminal)?;
    result
}

async fn handle_app_action(action: AppAction, app: &mut App, manager: &mut Manager) {
    let projects = manager.projects();
    let path_at = |index: usize| projects.get(index).map(|project| project.path.clone());
    if let Some(path) = path_at(app.selected) {
        manager.focus(&path);
    }

    match action {
        AppAction::None | AppAction::Quit => {}
        AppAction::Start(index) => {
            if let Some(project) = projects.get(index) {
                let path = project.path.clone();
                let script = preferred_script(project);
                match manager.start(&path, script.as_deref(), None).await {
                    Ok(()) => app.set_status_message(format!("Starting {}", path.display())),
                    Err(err) => app.set_status_warning(format!("Start failed: {:#}", err)),
                }
            }
        }
        AppAction::Stop(index) => {
            if let Some(path) = path_at(index) {
                if let Err(err) = manager.stop(&path).await {
                    app.set_status_warning(format!("Stop failed: {:#}", err));
                }
            }
        }
        AppAction::Reconcile => {
            manager.check_all_statuses();
            app.set_status_message("Checking for running servers");
        }
        AppAction::Shell(index) => {
            if let Some(path) = path_at(index) {
                manager.start_shell(&path);
            }
        }
        AppAction::ToggleAi => manager.toggle_ai().await,
        AppAction::ClearConsole => manager.clear_console(),
        AppAction::Line(line) => manager.run_line(&line).await,
        AppAction::Bytes(bytes) => manager.send_input(&bytes).await,
    }
}

fn spawn_input_listener(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || loop {
        if crossterm::event::poll(Duration::from_millis(100)).unwrap_or(false) {
            let sent = match crossterm::event::read() {
                Ok(crossterm::event::Event::Key(key))
                    if key.kind == crossterm::event::KeyEventKind::Press =>
                {
                    tx.blocking_send(Event::Key(key))
                }
                Ok(crossterm::event::Event::Resize(width, height)) => {
                    tx.blocking_send(Event::Resize { width, height })
                }
                _ => Ok(()),
            };
            if sent.is_err() {
                break;
            }
        }
    });
}

fn spawn_signal_listener(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                if tx.send(Event::Shutdown).await.is_err() {
                    break;
                }
            }
        }
        #[cfg(not(unix))]
        {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(Event::Shutdown).await.is_err() {
                    break;
                }
            }
        }
    });
}

fn spawn_stdin_listener(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buffer = [0u8; 1024];
        loop {
            match stdin.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.blocking_send(Event::Stdin(buffer[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
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
    use crate::project::{ProjectKind, ProjectStatus};
    use tempfile::TempDir;

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["devrack", "run", "web", "--script", "dev", "--port", "4000"])
            .unwrap();
        match cli.command {
            Some(Commands::Run {
                path, script, port, ..
            }) => {
                assert_eq!(path, PathBuf::from("web"));
                assert_eq!(script.as_deref(), Some("dev"));
                assert_eq!(port, Some(4000));
            }
            other => panic!("unexpected command: {:?}", other),
        }
        let cli = Cli::try_parse_from(["devrack", "remove", "web", "--delete-files"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Remove {
                delete_files: true,
                ..
            })
        ));
        assert!(Cli::try_parse_from(["devrack"]).unwrap().command.is_none());
    }

    #[test]
    fn flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("devrack.toml");
        std::fs::write(&config, "default_port = 4000\nmax_lines = 50\n").unwrap();
        let config_arg = config.to_string_lossy().to_string();

        let cli = Cli::try_parse_from(["devrack", "--config", config_arg.as_str(), "list"]).unwrap();
        let settings = load_settings(&cli).unwrap();
        assert_eq!((settings.default_port, settings.max_lines), (4000, 50));

        let cli = Cli::try_parse_from([
            "devrack",
            "--config",
            config_arg.as_str(),
            "--default-port",
            "5000",
            "--store",
            "/tmp/other.json",
            "status",
        ])
        .unwrap();
        let settings = load_settings(&cli).unwrap();
        assert_eq!(settings.default_port, 5000);
        assert_eq!(settings.max_lines, 50);
        assert_eq!(settings.store, PathBuf::from("/tmp/other.json"));
    }

    #[test]
    fn no_config_ignores_file() {
        let cli = Cli::try_parse_from(["devrack", "--no-config", "--config", "/missing.toml", "list"])
            .unwrap();
        assert_eq!(load_settings(&cli).unwrap().default_port, 3000);
    }

    #[test]
    fn add_then_list_round_trips_through_store() {
        let dir = TempDir::new().unwrap();
        let project_dir = dir.path().join("web");
        std::fs::create_dir(&project_dir).unwrap();
        std::fs::write(project_dir.join("package.json"), "{}").unwrap();
        let settings = Settings {
            store: dir.path().join("projects.json"),
            ..Settings::default()
        };

        add_project(&settings, &project_dir, Some("Web".into()), None).unwrap();
        add_project(&settings, &project_dir, None, None).unwrap();

        let store = JsonStore::open(settings.store.clone()).unwrap();
        let projects = store.list();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "Web");
        assert_eq!(projects[0].kind, ProjectKind::Node);
        assert_eq!(projects[0].url, "local");
    }

    #[test]
    fn add_rejects_missing_directory() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            store: dir.path().join("projects.json"),
            ..Settings::default()
        };
        let err = add_project(&settings, &dir.path().join("nope"), None, None).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn project_row_shows_port_and_status() {
        let mut project = Project::from_path("/work/api");
        project.status = ProjectStatus::Running;
        project.port = Some(8080);
        let row = format_project_row(&project);
        assert!(row.starts_with("api"));
        assert!(row.contains("running"));
        assert!(row.contains("8080"));
        assert!(row.ends_with("/work/api"));
    }
}
