//! Physical removal of soft-deleted rows once their retention window has passed.
//!
//! Only rows whose own `deleted_at` is set are purged; an artifact that is merely hidden by a
//! soft-deleted image stays until the image itself is purged, at which point the schema's
//! cascades remove it. Purge never touches stored files.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::metadata::MetadataStore;
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurgeStage {
    Artifacts,
    Images,
    Registries,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub artifacts: u64,
    pub images: u64,
    pub registries: u64,
    pub failed: Vec<PurgeStage>,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.artifacts + self.images + self.registries
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct Purger<M: MetadataStore> {
    metadata: M,
}

impl<M: MetadataStore> Purger<M> {
    pub fn new(metadata: M) -> Self {
        Self { metadata }
    }

    /// Purge rows of `account` soft-deleted at or before `cutoff` (epoch millis), artifacts
    /// first. Each stage is independent; a failed stage is recorded and the next one still
    /// runs, so re-running with the same cutoff picks up whatever was left.
    pub async fn purge(&self, account: &str, cutoff: i64) -> PurgeReport {
        let mut report = PurgeReport::default();

        match self.metadata.purge_artifacts(account, cutoff).await {
            Ok(n) => report.artifacts = n,
            Err(e) => stage_failed(&mut report, PurgeStage::Artifacts, account, e),
        }
        match self.metadata.purge_images(account, cutoff).await {
            Ok(n) => report.images = n,
            Err(e) => stage_failed(&mut report, PurgeStage::Images, account, e),
        }
        match self.metadata.purge_registries(account, cutoff).await {
            Ok(n) => report.registries = n,
            Err(e) => stage_failed(&mut report, PurgeStage::Registries, account, e),
        }

        tracing::info!(
            account,
            cutoff,
            artifacts = report.artifacts,
            images = report.images,
            registries = report.registries,
            failed = ?report.failed,
            "purged soft-deleted rows"
        );
        report
    }
}

fn stage_failed(report: &mut PurgeReport, stage: PurgeStage, account: &str, e: Error) {
    tracing::error!(account, ?stage, error = %e, "purge stage failed");
    report.failed.push(stage);
}

/// Periodically purges every configured account using a fixed retention window.
pub struct PurgeJob<M: MetadataStore> {
    purger: Purger<M>,
    accounts: Vec<String>,
    retention: chrono::Duration,
    interval: Duration,
}

impl<M: MetadataStore> PurgeJob<M> {
    pub fn new(
        purger: Purger<M>,
        accounts: Vec<String>,
        retention: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            purger,
            accounts,
            retention,
            interval,
        }
    }

    /// One pass over every account with `cutoff = now - retention`.
    pub async fn run_once(&self) -> Vec<(String, PurgeReport)> {
        let cutoff = (Utc::now() - self.retention).timestamp_millis();
        let mut reports = Vec::with_capacity(self.accounts.len());
        for account in self.accounts.iter() {
            let report = self.purger.purge(account, cutoff).await;
            reports.push((account.clone(), report));
        }
        reports
    }

    /// Run passes on the configured interval until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reports = self.run_once().await;
                    tracing::debug!(accounts = reports.len(), "purge pass finished");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("purge job shutting down");
                        return;
                    }
                }
            }
        }
    }
}
