//! Host and view wired together in-process through [`pump`].

use std::sync::Arc;
use std::time::Duration;

use panel::bus::{MessageBus, pump};
use panel::cancel::CancellationToken;
use panel::core::ui_state::{SaveIndicator, ServerIndicator, UiState};
use panel::host::HostCoordinator;
use panel::io::git::Git;
use panel::io::supervisor::Supervisor;
use panel::reconcile::Reconciler;
use panel::test_support::{FakeVcs, StaticReviewLookup, TestRepo};
use panel::ui::{UiSession, UiSettings};
use tokio::sync::watch;

struct Wired {
    host: HostCoordinator,
    view: UiSession,
}

fn wire(reconciler: Reconciler, supervisor: Option<Supervisor>) -> Wired {
    let (host_bus, host_out) = MessageBus::new("host");
    let (ui_bus, ui_out) = MessageBus::new("ui");

    let host = HostCoordinator::new(host_bus.clone(), supervisor, Arc::new(reconciler));
    host.attach();
    let view = UiSession::new(ui_bus.clone(), UiSettings::default());
    view.attach();

    pump(ui_out, host_bus);
    pump(host_out, ui_bus);
    Wired { host, view }
}

async fn wait_state(
    rx: &mut watch::Receiver<UiState>,
    condition: impl FnMut(&UiState) -> bool,
) -> UiState {
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(condition))
        .await
        .expect("state reached in time")
        .expect("session alive")
        .clone()
}

#[tokio::test]
async fn ping_brings_liveness_and_review_link_to_view() {
    let vcs = Arc::new(FakeVcs::on_branch("updates"));
    let reviews = Arc::new(StaticReviewLookup::link("https://example.test/pr/3"));
    let wired = wire(Reconciler::new(vcs, reviews, "updates"), None);
    let mut rx = wired.view.subscribe();

    wired.view.poll();
    let state = wait_state(&mut rx, |state| state.server != ServerIndicator::Unknown).await;
    assert_eq!(state.server, ServerIndicator::Down);
    assert_eq!(state.review_link.as_deref(), Some("https://example.test/pr/3"));
    assert_eq!(
        state.status_line(),
        "Status: down | approve here: https://example.test/pr/3"
    );
}

#[tokio::test]
async fn running_worker_shows_as_running() {
    let vcs = Arc::new(FakeVcs::on_branch("master"));
    let supervisor = Supervisor::new(
        vec!["sleep".to_string(), "30".to_string()],
        std::env::temp_dir(),
        CancellationToken::new(),
    );
    supervisor.start();
    let wired = wire(
        Reconciler::new(vcs, Arc::new(StaticReviewLookup::none()), "updates"),
        Some(supervisor.clone()),
    );
    let mut rx = wired.view.subscribe();

    let cancel = CancellationToken::new();
    let poller = {
        let view = wired.view.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { view.run(cancel).await })
    };
    let state = wait_state(&mut rx, |state| state.server == ServerIndicator::Running).await;
    assert_eq!(state.review_link, None);

    supervisor.stop().await;
    wait_state(&mut rx, |state| state.server == ServerIndicator::Down).await;

    cancel.cancel();
    poller.await.expect("poller");
    assert!(wired.host.supervisor().is_some());
}

#[tokio::test]
async fn save_round_trip_through_real_git() {
    let repo = TestRepo::new().expect("repo");
    let reconciler = Reconciler::new(
        Arc::new(Git::new(repo.path())),
        Arc::new(StaticReviewLookup::none()),
        "updates",
    );
    let wired = wire(reconciler, None);
    let mut rx = wired.view.subscribe();

    repo.write_file("content/index.md", "# Häuser ✓\n").expect("write");
    let message = "Neue Überschrift für die Startseite ✓";
    wired.view.request_save(message).expect("gate");
    let state = wait_state(&mut rx, |state| state.save == SaveIndicator::Succeeded).await;
    assert_eq!(state.status_line(), "Status: unknown | saved");

    assert_eq!(
        repo.remote_subjects("updates").expect("log"),
        vec![message, "initial"]
    );
}

#[tokio::test]
async fn failed_save_reaches_view() {
    let vcs = Arc::new(FakeVcs::on_branch("updates"));
    let wired = wire(
        Reconciler::new(vcs.clone(), Arc::new(StaticReviewLookup::none()), "updates"),
        None,
    );
    let mut rx = wired.view.subscribe();

    wired.view.request_save("nothing changed at all").expect("gate");
    wait_state(&mut rx, |state| state.save == SaveIndicator::Failed).await;
    assert!(vcs.snapshot().pushed.is_empty());
}
