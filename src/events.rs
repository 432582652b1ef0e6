//! Outbound registry events (webhooks, index rebuild requests).
//!
//! Deletion never waits on event delivery. Events are handed to an [`EventReporter`], which for
//! production use is a [`QueuedEventReporter`]: a bounded queue drained by an [`EventDispatcher`]
//! into an [`EventSink`]. A full queue drops the event and logs it rather than applying
//! backpressure to the deletion path.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::{OciDigest, PackageType, Result};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ArtifactDeletedPayload {
    Oci {
        principal_id: i64,
        registry_id: i64,
        registry_name: String,
        root_identifier: String,
        package_type: PackageType,
        image: String,
        /// The tag name in tagged mode, the digest in untagged mode.
        version: String,
        digest: OciDigest,
        untagged: bool,
    },
    Common {
        principal_id: i64,
        registry_id: i64,
        package_type: PackageType,
        image: String,
        version: String,
    },
}

/// A package source feeding a registry-wide index rebuild.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub registry_id: i64,
    pub image: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    ArtifactDeleted(ArtifactDeletedPayload),
    BuildRegistryIndex {
        registry_id: i64,
        source_refs: Vec<SourceRef>,
    },
    BuildPackageIndex {
        registry_id: i64,
        image: String,
    },
}

/// Fire-and-forget sink for registry events. Implementations must not block or fail the caller.
pub trait EventReporter: Send + Sync {
    fn report(&self, event: RegistryEvent);

    fn artifact_deleted(&self, payload: ArtifactDeletedPayload) {
        self.report(RegistryEvent::ArtifactDeleted(payload));
    }

    fn build_registry_index(&self, registry_id: i64, source_refs: Vec<SourceRef>) {
        self.report(RegistryEvent::BuildRegistryIndex {
            registry_id,
            source_refs,
        });
    }

    fn build_package_index(&self, registry_id: i64, image: &str) {
        self.report(RegistryEvent::BuildPackageIndex {
            registry_id,
            image: image.to_string(),
        });
    }
}

#[derive(Clone)]
pub struct QueuedEventReporter {
    tx: mpsc::Sender<RegistryEvent>,
}

impl QueuedEventReporter {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RegistryEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventReporter for QueuedEventReporter {
    fn report(&self, event: RegistryEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(?event, "event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::warn!(?event, "event queue closed, dropping event");
            }
        }
    }
}

/// Delivery target for queued events (webhook transport, index builders).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &RegistryEvent) -> Result<()>;
}

/// Logs every event. Used when no delivery transport is configured.
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn deliver(&self, event: &RegistryEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        tracing::info!(target: "registry_reaper::events", %payload, "registry event");
        Ok(())
    }
}

pub struct EventDispatcher<S: EventSink> {
    rx: mpsc::Receiver<RegistryEvent>,
    sink: S,
}

impl<S: EventSink> EventDispatcher<S> {
    pub fn new(rx: mpsc::Receiver<RegistryEvent>, sink: S) -> Self {
        Self { rx, sink }
    }

    /// Deliver events until every reporter is gone or `shutdown` flips to true. Returns the
    /// number of events handed to the sink.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut delivered = 0;
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => {
                        self.deliver(&event).await;
                        delivered += 1;
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // flush whatever was already queued
        self.rx.close();
        while let Some(event) = self.rx.recv().await {
            self.deliver(&event).await;
            delivered += 1;
        }
        delivered
    }

    async fn deliver(&self, event: &RegistryEvent) {
        if let Err(e) = self.sink.deliver(event).await {
            tracing::warn!(?event, error = %e, "failed to deliver registry event");
        }
    }
}
