//! Panel host server: supervises the site worker, runs saves and talks to the
//! attached view over HTTP + SSE.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use panel::bus::MessageBus;
use panel::cancel::CancellationToken;
use panel::host::HostCoordinator;
use panel::io::config::{PanelConfig, ReviewProvider, config_path, load_config};
use panel::io::discovery::discover_site_config;
use panel::io::git::Git;
use panel::io::review::{GhReviewLookup, NoReviewLookup, ReviewLookup};
use panel::io::supervisor::{Supervisor, for_site};
use panel::reconcile::Reconciler;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "panel-host")]
#[command(about = "Host for the site panel: worker supervision, saves and the view channel")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "7878")]
    port: u16,

    /// Workspace root (git repository containing the site)
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Panel config file (defaults to <workspace>/panel.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory containing the view's static files
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("panel_host=info,panel=info")),
        )
        .init();

    let args = Args::parse();

    let workspace = args.workspace.canonicalize().unwrap_or(args.workspace);
    let config_file = args.config.unwrap_or_else(|| config_path(&workspace));
    let cfg = load_config(&config_file)?;
    info!(workspace = %workspace.display(), config = %config_file.display(), "starting panel-host");

    let shutdown = CancellationToken::new();
    let supervisor = start_worker(&workspace, &cfg, &shutdown);
    let state = build_state(&workspace, &cfg, supervisor.clone(), shutdown.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state);

    let ui_dir = args.ui_dir.unwrap_or_else(|| workspace.join("ui").join("dist"));
    if ui_dir.exists() {
        info!(ui_dir = %ui_dir.display(), "serving static UI files");
        app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
    } else {
        info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    if let Some(supervisor) = supervisor {
        supervisor.stop().await;
        info!(
            restarts = supervisor.snapshot().restart_count,
            "worker stopped"
        );
    }
    Ok(())
}

/// Start the worker next to the site config, if exactly one is found.
fn start_worker(
    workspace: &std::path::Path,
    cfg: &PanelConfig,
    shutdown: &CancellationToken,
) -> Option<Supervisor> {
    let Some(site_config) = discover_site_config(
        workspace,
        &cfg.worker.site_config,
        cfg.worker.discovery_max_depth,
    ) else {
        warn!(
            file = %cfg.worker.site_config,
            "no unique site config found, running without a worker"
        );
        return None;
    };
    info!(site_config = %site_config.display(), "supervising worker");
    let supervisor = for_site(cfg.worker.command.clone(), &site_config, shutdown.clone());
    supervisor.start();
    Some(supervisor)
}

fn build_state(
    workspace: &std::path::Path,
    cfg: &PanelConfig,
    supervisor: Option<Supervisor>,
    shutdown: CancellationToken,
) -> AppState {
    let git = Git::new(workspace).with_remote(cfg.vcs.remote.clone());
    let reviews: Arc<dyn ReviewLookup> = match cfg.vcs.review {
        ReviewProvider::None => Arc::new(NoReviewLookup),
        ReviewProvider::Gh => Arc::new(GhReviewLookup::new(workspace)),
    };
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(git),
        reviews,
        cfg.vcs.target_branch.clone(),
    ));

    let (bus, outbound) = MessageBus::new("host");
    let host = HostCoordinator::new(bus, supervisor, reconciler);
    host.attach();
    AppState::new(host, outbound, shutdown)
}

/// Resolve on Ctrl-C and fire `shutdown`, which also stops the worker monitor.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(err = %err, "failed to listen for ctrl-c");
        shutdown.cancelled().await;
        return;
    }
    info!("shutting down");
    shutdown.cancel();
}

#[cfg(test)]
fn test_state(vcs: Arc<panel::test_support::FakeVcs>) -> (AppState, Arc<panel::test_support::FakeVcs>) {
    use panel::test_support::StaticReviewLookup;

    let reviews = Arc::new(StaticReviewLookup::link("https://example.test/pr/7"));
    let reconciler = Arc::new(Reconciler::new(vcs.clone(), reviews, "updates"));
    let (bus, outbound) = MessageBus::new("host");
    let host = HostCoordinator::new(bus, None, reconciler);
    host.attach();
    (
        AppState::new(host, outbound, CancellationToken::new()),
        vcs,
    )
}
