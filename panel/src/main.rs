//! Site panel CLI.
//!
//! `init` and `discover` work on the local workspace; `attach` and `save`
//! act as a view of a running `panel-host`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use panel::bus::MessageBus;
use panel::cancel::CancellationToken;
use panel::client::HttpTransport;
use panel::core::ui_state::{SaveIndicator, UiState};
use panel::exit_codes;
use panel::io::config::{PanelConfig, config_path, load_config, write_config};
use panel::io::discovery::discover_site_config;
use panel::ui::{UiSession, UiSettings};

const DEFAULT_HOST_URL: &str = "http://127.0.0.1:7878";

#[derive(Parser)]
#[command(
    name = "panel",
    version,
    about = "Keep a site view in sync with its server and save workflow"
)]
struct Cli {
    /// Workspace root holding `panel.toml`.
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `panel.toml`.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the site config the worker would run next to.
    Discover,
    /// Attach as the view of a running host and print status changes.
    Attach {
        #[arg(long, default_value = DEFAULT_HOST_URL)]
        url: String,
    },
    /// Publish pending changes through a running host.
    Save {
        #[arg(long, default_value = DEFAULT_HOST_URL)]
        url: String,
        /// Commit message.
        #[arg(short, long)]
        message: String,
        /// Give up waiting for the result after this many seconds.
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
    },
}

fn main() {
    panel::logging::init("warn");
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.workspace, force),
        Command::Discover => cmd_discover(&cli.workspace),
        Command::Attach { url } => {
            let cfg = load_config(&config_path(&cli.workspace))?;
            runtime()?.block_on(cmd_attach(&url, UiSettings::from(&cfg.ui)))
        }
        Command::Save {
            url,
            message,
            timeout_secs,
        } => {
            let cfg = load_config(&config_path(&cli.workspace))?;
            runtime()?.block_on(cmd_save(
                &url,
                &message,
                Duration::from_secs(timeout_secs),
                UiSettings::from(&cfg.ui),
            ))
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")
}

fn cmd_init(workspace: &Path, force: bool) -> Result<i32> {
    let path = config_path(workspace);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(&path, &PanelConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_discover(workspace: &Path) -> Result<i32> {
    let cfg = load_config(&config_path(workspace))?;
    match discover_site_config(
        workspace,
        &cfg.worker.site_config,
        cfg.worker.discovery_max_depth,
    ) {
        Some(path) => {
            println!("{}", path.display());
            Ok(exit_codes::OK)
        }
        None => {
            eprintln!(
                "no unique {} found under {}",
                cfg.worker.site_config,
                workspace.display()
            );
            Ok(exit_codes::INVALID)
        }
    }
}

/// A connected view: session plus the tasks moving frames over HTTP.
struct View {
    session: UiSession,
    cancel: CancellationToken,
    forward: tokio::task::JoinHandle<()>,
    listen: tokio::task::JoinHandle<Result<()>>,
}

impl View {
    async fn connect(url: &str, settings: UiSettings) -> Result<Self> {
        let transport = HttpTransport::new(url)?;
        transport.health().await?;
        let events = transport.open_events().await?;

        let (bus, outbound) = MessageBus::new("ui");
        let session = UiSession::new(bus.clone(), settings);
        session.attach();

        let cancel = CancellationToken::new();
        let forward = {
            let transport = transport.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { transport.forward(outbound, cancel).await })
        };
        let listen = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let result = events.listen(&bus, &cancel).await;
                // Host gone: stop the whole view.
                cancel.cancel();
                result
            })
        };
        Ok(Self {
            session,
            cancel,
            forward,
            listen,
        })
    }

    /// Stop both tasks; returns the error that ended the event stream, if any.
    async fn close(self) -> Result<()> {
        self.cancel.cancel();
        let _ = self.forward.await;
        self.listen.await.context("join event listener")?
    }
}

async fn cmd_attach(url: &str, settings: UiSettings) -> Result<i32> {
    let view = View::connect(url, settings).await?;
    let poller = {
        let session = view.session.clone();
        let cancel = view.cancel.clone();
        tokio::spawn(async move { session.run(cancel).await })
    };

    let mut states = view.session.subscribe();
    let mut last_line = String::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = view.cancel.cancelled() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = states.borrow_and_update().status_line();
                if line != last_line {
                    println!("{line}");
                    last_line = line;
                }
            }
        }
    }

    view.cancel.cancel();
    let _ = poller.await;
    view.close().await?;
    Ok(exit_codes::OK)
}

async fn cmd_save(url: &str, message: &str, timeout: Duration, settings: UiSettings) -> Result<i32> {
    let view = View::connect(url, settings).await?;
    let mut states = view.session.subscribe();

    if let Err(rejected) = view.session.request_save(message) {
        view.close().await?;
        bail!("{rejected}");
    }

    let waited = tokio::select! {
        biased;
        finished = tokio::time::timeout(timeout, states.wait_for(is_finished)) => {
            Some(finished.map(|waited| waited.map(|state| state.save)))
        }
        _ = view.cancel.cancelled() => None,
    };
    let Some(finished) = waited else {
        view.close().await?;
        bail!("host closed the event stream before the save finished");
    };
    let code = match finished {
        Ok(Ok(SaveIndicator::Succeeded)) => {
            println!("saved");
            exit_codes::OK
        }
        Ok(Ok(_)) => {
            eprintln!("save failed; see the host log for the failing step");
            exit_codes::SAVE_FAILED
        }
        Ok(Err(_)) => exit_codes::INVALID,
        Err(_) => {
            eprintln!("no save result within {}s", timeout.as_secs());
            exit_codes::TIMED_OUT
        }
    };
    view.close().await?;
    Ok(code)
}

fn is_finished(state: &UiState) -> bool {
    matches!(
        state.save,
        SaveIndicator::Succeeded | SaveIndicator::Failed
    )
}
