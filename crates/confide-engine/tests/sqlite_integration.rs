/// Integration tests: the full engine over the SQLite backend.
mod common;

use std::sync::Arc;

use common::{assert_conserved, assert_exclusive, holders_of, register_all};
use confide_engine::{EngineConfig, Email, ShareService, SqliteStore, SweepOutcome};

fn sqlite_service(path: &std::path::Path, n: usize, seed: u64) -> ShareService<SqliteStore> {
    common::init_tracing();
    let store = SqliteStore::open(path).expect("open database");
    ShareService::seeded(Arc::new(store), EngineConfig::new().share_count(n), seed)
        .expect("valid config")
}

/// Submit, distribute, delete and sweep, all persisted in one file.
#[tokio::test]
async fn full_lifecycle_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let svc = sqlite_service(&dir.path().join("confide.db"), 3, 20);
    register_all(&svc, &["a@x", "b@x", "c@x", "d@x", "e@x"]).await;

    let owner = Email::from("a@x");
    let id = svc.submit_secret(&owner, b"persisted secret").await.unwrap();
    svc.distribute_all(&owner).await.unwrap();
    assert_eq!(holders_of(&svc, &id).await.len(), 3);
    assert_conserved(&svc, 3).await;

    let mut tokens = Vec::new();
    for holder in holders_of(&svc, &id).await {
        let shares = svc.held_shares(&holder.as_str().into()).await.unwrap();
        tokens.extend(shares.into_iter().map(|s| s.payload));
    }
    assert_eq!(svc.recover(&tokens).unwrap().as_slice(), b"persisted secret");

    // a holder leaves: the share moves, the count holds
    let holder = Email::new(holders_of(&svc, &id).await[0].clone());
    let report = svc.delete_account(&holder).await.unwrap();
    assert_eq!(report.relocated.len(), 1);
    assert_eq!(holders_of(&svc, &id).await.len(), 3);
    assert_exclusive(&svc).await;
}

/// Queue, progress and holdings are all still there after reopening.
#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confide.db");
    let owner = Email::from("a@x");

    let id = {
        let svc = sqlite_service(&path, 3, 21);
        register_all(&svc, &["a@x", "b@x"]).await;
        let id = svc.submit_secret(&owner, b"halfway").await.unwrap();
        svc.distribute_all(&owner).await.unwrap();
        id
    };

    let svc = sqlite_service(&path, 3, 22);
    let progress = svc.all_progress(&owner).await.unwrap();
    assert_eq!(progress[0].secret_id, id);
    assert_eq!(progress[0].placed, 1);
    assert_eq!(holders_of(&svc, &id).await, vec!["b@x"]);

    register_all(&svc, &["c@x", "d@x"]).await;
    svc.distribute_all(&owner).await.unwrap();
    assert!(svc.user(&owner).await.unwrap().queue.is_empty());
    assert_conserved(&svc, 3).await;
}

/// The ledger is durable: a sweep after restart still finds its work.
#[tokio::test]
async fn ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confide.db");

    let id = {
        let svc = sqlite_service(&path, 4, 23);
        register_all(&svc, &["a@x", "b@x", "c@x"]).await;
        let owner = Email::from("a@x");
        let id = svc.submit_secret(&owner, b"orphaned").await.unwrap();
        svc.distribute_all(&owner).await.unwrap();
        svc.delete_account(&owner).await.unwrap();
        id
    };

    let svc = sqlite_service(&path, 4, 24);
    assert!(matches!(
        svc.sweep_once().await.unwrap(),
        SweepOutcome::Purged { holders: 2, .. }
    ));
    assert!(holders_of(&svc, &id).await.is_empty());
    assert!(matches!(
        svc.sweep_once().await.unwrap(),
        SweepOutcome::Resolved { .. }
    ));
    assert_eq!(svc.sweep_once().await.unwrap(), SweepOutcome::Empty);
}

/// Renaming a user carries queued and held data with it.
#[tokio::test]
async fn profile_update_moves_everything() {
    let dir = tempfile::tempdir().unwrap();
    let svc = sqlite_service(&dir.path().join("confide.db"), 2, 25);
    register_all(&svc, &["a@x", "b@x"]).await;
    let id = svc.submit_secret(&"a@x".into(), b"renamed").await.unwrap();
    svc.distribute_all(&"a@x".into()).await.unwrap();

    svc.update_profile(&"b@x".into(), Some("Bo"), Some(&"bo@x".into()))
        .await
        .unwrap();
    svc.update_profile(&"a@x".into(), None, Some(&"ann@x".into()))
        .await
        .unwrap();

    assert_eq!(holders_of(&svc, &id).await, vec!["bo@x"]);
    let ann = svc.user(&"ann@x".into()).await.unwrap();
    assert_eq!(ann.progress.get(&id), Some(1));
    assert_eq!(ann.queue.len(), 1);
    assert!(!svc.is_email_taken(&"a@x".into()).await.unwrap());
    assert_eq!(svc.user(&"bo@x".into()).await.unwrap().name, "Bo");
}

/// Parallel owners against one database file.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rounds_on_sqlite() {
    let n = 3;
    let dir = tempfile::tempdir().unwrap();
    let svc = Arc::new(sqlite_service(&dir.path().join("confide.db"), n, 26));
    let emails: Vec<Email> = (0..8).map(|i| Email::new(format!("s{i}@x"))).collect();
    for email in &emails {
        svc.register(email, "s").await.unwrap();
        svc.submit_secret(email, b"parallel").await.unwrap();
    }

    let tasks: Vec<_> = emails
        .iter()
        .cloned()
        .map(|email| {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.distribute_all(&email).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_exclusive(&svc).await;
    assert_conserved(&svc, n).await;
    assert_eq!(svc.metrics().secrets_completed, 8);
}
