//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use confide_engine::{
    Datastore, EngineConfig, MemoryStore, SecretId, ShareService, User, UserFilter,
};

/// Route engine logs through the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn memory_service(n: usize, seed: u64) -> ShareService<MemoryStore> {
    init_tracing();
    ShareService::seeded(
        Arc::new(MemoryStore::new()),
        EngineConfig::new().share_count(n),
        seed,
    )
    .expect("valid config")
}

pub async fn register_all<S: Datastore>(svc: &ShareService<S>, emails: &[&str]) {
    for email in emails {
        svc.register(&(*email).into(), email).await.expect("register");
    }
}

pub async fn all_users<S: Datastore>(svc: &ShareService<S>) -> Vec<User> {
    svc.store().find_users(&UserFilter::all()).await.expect("find users")
}

/// Emails of everyone holding a share of `secret_id`, sorted.
pub async fn holders_of<S: Datastore>(svc: &ShareService<S>, secret_id: &SecretId) -> Vec<String> {
    svc.store()
        .find_users(&UserFilter::all().holding_share_for(secret_id.clone()))
        .await
        .expect("find holders")
        .into_iter()
        .map(|u| u.email.to_string())
        .collect()
}

/// Held share count per secret id across every user.
pub async fn held_counts<S: Datastore>(svc: &ShareService<S>) -> HashMap<SecretId, usize> {
    let mut counts = HashMap::new();
    for user in all_users(svc).await {
        for share in user.held_shares {
            *counts.entry(share.secret_id).or_insert(0) += 1;
        }
    }
    counts
}

/// No user holds two shares of one secret, and nobody holds their own.
pub async fn assert_exclusive<S: Datastore>(svc: &ShareService<S>) {
    for user in all_users(svc).await {
        let mut seen = HashSet::new();
        for share in &user.held_shares {
            assert!(
                seen.insert(share.secret_id.clone()),
                "{} holds two shares of {}",
                user.email,
                share.secret_id
            );
            assert!(
                !user.progress.contains(&share.secret_id),
                "{} holds a share of its own secret {}",
                user.email,
                share.secret_id
            );
        }
    }
}

/// `remaining + progress == n` for every secret of every live owner, and
/// every placed share is held by exactly one user.
pub async fn assert_conserved<S: Datastore>(svc: &ShareService<S>, n: usize) {
    let held = held_counts(svc).await;
    for user in all_users(svc).await {
        for (secret_id, placed) in user.progress.iter() {
            let remaining = user
                .pending(secret_id)
                .map(|p| p.remaining.len())
                .unwrap_or(0);
            assert_eq!(
                remaining + placed,
                n,
                "{} secret {secret_id}: {remaining} remaining + {placed} placed",
                user.email
            );
            assert_eq!(
                held.get(secret_id).copied().unwrap_or(0),
                placed,
                "holders of {secret_id} disagree with its progress"
            );
        }
    }
}
