//! ShareService: the engine's facade at the request boundary.
//!
//! Owns one instance of every component, all sharing the same datastore
//! and metrics.
use std::sync::Arc;

use confide_metrics::{EngineMetrics, MetricsSnapshot};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use zeroize::Zeroizing;

use crate::config::EngineConfig;
use crate::distributor::{Distributor, RoundOutcome};
use crate::error::ConfideError;
use crate::ledger::{LedgerSweeper, SweepOutcome};
use crate::progress::{ProgressTracker, SecretProgress};
use crate::reclaim::{DeletionReclaimer, ReclaimReport};
use crate::splitter::{ShamirScheme, ThresholdScheme};
use crate::store::Datastore;
use crate::types::{Email, PendingSecret, ReceivedShare, SecretId, ShareToken, User};

pub struct ShareService<S> {
    store: Arc<S>,
    scheme: Arc<dyn ThresholdScheme>,
    config: EngineConfig,
    metrics: Arc<EngineMetrics>,
    distributor: Distributor<S>,
    progress: ProgressTracker<S>,
    reclaimer: DeletionReclaimer<S>,
    sweeper: LedgerSweeper<S>,
}

impl<S: Datastore> ShareService<S> {
    /// Service splitting with [`ShamirScheme`] and drawing recipients from
    /// OS-seeded randomness.
    pub fn new(store: Arc<S>, config: EngineConfig) -> Result<Self, ConfideError> {
        Self::with_scheme(store, config, Arc::new(ShamirScheme::new()))
    }

    pub fn with_scheme(
        store: Arc<S>,
        config: EngineConfig,
        scheme: Arc<dyn ThresholdScheme>,
    ) -> Result<Self, ConfideError> {
        Self::build(store, config, scheme, StdRng::from_os_rng())
    }

    /// Reproducible recipient selection, for tests and simulations.
    pub fn seeded(store: Arc<S>, config: EngineConfig, seed: u64) -> Result<Self, ConfideError> {
        Self::build(
            store,
            config,
            Arc::new(ShamirScheme::new()),
            StdRng::seed_from_u64(seed),
        )
    }

    fn build(
        store: Arc<S>,
        config: EngineConfig,
        scheme: Arc<dyn ThresholdScheme>,
        mut rng: StdRng,
    ) -> Result<Self, ConfideError> {
        config.validate()?;
        let n = config.get_share_count();
        let metrics = Arc::new(EngineMetrics::new());

        let distributor = Distributor::with_rng(
            Arc::clone(&store),
            Arc::clone(&metrics),
            StdRng::seed_from_u64(rng.next_u64()),
        );
        let reclaimer = DeletionReclaimer::with_rng(
            Arc::clone(&store),
            n,
            Arc::clone(&metrics),
            StdRng::seed_from_u64(rng.next_u64()),
        );

        Ok(Self {
            progress: ProgressTracker::new(Arc::clone(&store), n),
            sweeper: LedgerSweeper::new(Arc::clone(&store), Arc::clone(&metrics)),
            distributor,
            reclaimer,
            store,
            scheme,
            config,
            metrics,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ── Accounts ──────────────────────────────────────────────────────────

    pub async fn register(&self, email: &Email, name: &str) -> Result<(), ConfideError> {
        self.store.insert_user(email, name).await?;
        tracing::info!(%email, "user registered");
        Ok(())
    }

    pub async fn user(&self, email: &Email) -> Result<User, ConfideError> {
        self.store
            .find_user(email)
            .await?
            .ok_or_else(|| ConfideError::user_not_found(email))
    }

    pub async fn is_email_taken(&self, email: &Email) -> Result<bool, ConfideError> {
        Ok(self.store.find_user(email).await?.is_some())
    }

    /// Change display name and/or email. Shares, queue and progress follow
    /// the record to its new email.
    pub async fn update_profile(
        &self,
        email: &Email,
        name: Option<&str>,
        new_email: Option<&Email>,
    ) -> Result<(), ConfideError> {
        self.store.update_profile(email, name, new_email).await?;
        tracing::info!(%email, new_email = ?new_email.map(Email::as_str), "profile updated");
        Ok(())
    }

    /// Shares this user holds for other people's secrets.
    pub async fn held_shares(&self, email: &Email) -> Result<Vec<ReceivedShare>, ConfideError> {
        Ok(self.user(email).await?.held_shares)
    }

    // ── Secrets ───────────────────────────────────────────────────────────

    /// Split `secret` into the configured number of shares and queue them
    /// for distribution.
    pub async fn submit_secret(&self, email: &Email, secret: &[u8]) -> Result<SecretId, ConfideError> {
        let shares = self.scheme.split(secret, self.config.get_share_count())?;
        let secret_id = SecretId::generate();
        self.store
            .enqueue_secret(email, PendingSecret::new(secret_id.clone(), shares))
            .await?;
        tracing::info!(%email, %secret_id, "secret queued");
        Ok(secret_id)
    }

    pub async fn distribute_one(&self, email: &Email) -> Result<RoundOutcome, ConfideError> {
        self.distributor.distribute_one(email).await
    }

    pub async fn distribute_all(&self, email: &Email) -> Result<Vec<RoundOutcome>, ConfideError> {
        self.distributor.distribute_all(email).await
    }

    pub async fn all_progress(&self, email: &Email) -> Result<Vec<SecretProgress>, ConfideError> {
        self.progress.all_progress(email).await
    }

    /// Rebuild a secret from every one of its shares.
    pub fn recover(&self, shares: &[ShareToken]) -> Result<Zeroizing<Vec<u8>>, ConfideError> {
        self.scheme.combine(shares).map_err(ConfideError::Reconstruction)
    }

    // ── Deletion ──────────────────────────────────────────────────────────

    pub async fn delete_account(&self, email: &Email) -> Result<ReclaimReport, ConfideError> {
        self.reclaimer.reclaim(email).await
    }

    pub async fn sweep_once(&self) -> Result<SweepOutcome, ConfideError> {
        self.sweeper.sweep_once().await
    }

    pub async fn sweep_all(&self) -> Result<Vec<SweepOutcome>, ConfideError> {
        self.sweeper.sweep_all().await
    }

    /// One background sweep tick, batch or single per the config.
    pub async fn sweep_tick(&self) -> Result<Vec<SweepOutcome>, ConfideError> {
        if self.config.get_sweep_batch() {
            self.sweep_all().await
        } else {
            Ok(vec![self.sweep_once().await?])
        }
    }
}
