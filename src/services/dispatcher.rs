//! EventDispatcher: applies a batch of change notifications.
//!
//! Every record runs inside its own failure boundary and ends up as one
//! entry of the returned [`BatchReport`]. Events that share a key are
//! applied in delivery order; distinct keys run concurrently up to the
//! configured limit.

use crate::{
    models::{
        event::{ChangeEvent, ChangeKind},
        report::{BatchReport, FailureKind, RecordOutcome, RecordReport},
        thumbnail::{SourceObject, Thumbnail},
    },
    services::{
        pipeline::{RenderFailure, ThumbnailPipeline},
        storage::{ObjectStore, StoreError},
    },
};
use futures::{StreamExt, stream};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub source_bucket: String,
    pub destination_bucket: String,
    /// Upper bound on keys processed at the same time.
    pub concurrency: usize,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("fetching `{key}` from `{bucket}`: {source}")]
    Fetch {
        bucket: String,
        key: String,
        source: StoreError,
    },
    #[error(transparent)]
    Render(#[from] RenderFailure),
    #[error("writing `{key}` to `{bucket}`: {source}")]
    Store {
        bucket: String,
        key: String,
        source: StoreError,
    },
}

impl RecordError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Fetch { .. } => FailureKind::FetchError,
            Self::Render(_) => FailureKind::RenderFailure,
            Self::Store { .. } => FailureKind::StoreError,
        }
    }
}

#[derive(Clone)]
pub struct EventDispatcher {
    config: Arc<DispatcherConfig>,
    source: Arc<dyn ObjectStore>,
    destination: Arc<dyn ObjectStore>,
    pipeline: Arc<ThumbnailPipeline>,
}

impl EventDispatcher {
    pub fn new(
        config: DispatcherConfig,
        source: Arc<dyn ObjectStore>,
        destination: Arc<dyn ObjectStore>,
        pipeline: Arc<ThumbnailPipeline>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            source,
            destination,
            pipeline,
        }
    }

    /// Apply every event of a batch and report the outcome of each.
    pub async fn dispatch(&self, events: Vec<ChangeEvent>) -> BatchReport {
        let total = events.len();
        let groups = group_by_key(events);
        info!(
            "Dispatching {} records across {} keys",
            total,
            groups.len()
        );

        let records = stream::iter(groups)
            .map(|group| self.process_group(group))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        let report = BatchReport::from_records(records);
        info!(
            "Batch finished: {} processed, {} failed",
            report.processed, report.failed
        );
        report
    }

    async fn process_group(&self, group: Vec<ChangeEvent>) -> Vec<RecordReport> {
        let mut reports = Vec::with_capacity(group.len());
        for event in group {
            reports.push(self.process_event(event).await);
        }
        reports
    }

    #[instrument(skip_all, fields(key = %event.key, event = %event.event_name))]
    async fn process_event(&self, event: ChangeEvent) -> RecordReport {
        let outcome = match (event.kind, self.foreign_bucket(&event)) {
            (None, _) => {
                warn!("ignoring unsupported event");
                RecordOutcome::Ignored {
                    reason: format!("unsupported event `{}`", event.event_name),
                }
            }
            (Some(_), Some(bucket)) => {
                warn!("ignoring event for bucket `{}`", bucket);
                RecordOutcome::Ignored {
                    reason: format!(
                        "bucket `{}` is not the source bucket `{}`",
                        bucket, self.config.source_bucket
                    ),
                }
            }
            (Some(ChangeKind::Created), None) => match self.handle_created(&event.key).await {
                Ok(Some(thumb)) => {
                    info!("stored {}x{} thumbnail", thumb.width, thumb.height);
                    RecordOutcome::Stored {
                        width: thumb.width,
                        height: thumb.height,
                        size_bytes: thumb.data.len(),
                    }
                }
                Ok(None) => {
                    info!("content not thumbnailable, skipped");
                    RecordOutcome::Skipped
                }
                Err(err) => failure(err),
            },
            (Some(ChangeKind::Removed), None) => match self.handle_removed(&event.key).await {
                Ok(()) => {
                    info!("thumbnail deleted");
                    RecordOutcome::Deleted
                }
                Err(err) => failure(err),
            },
        };

        RecordReport {
            index: event.index,
            key: event.key,
            event_name: event.event_name,
            outcome,
        }
    }

    fn foreign_bucket<'e>(&self, event: &'e ChangeEvent) -> Option<&'e str> {
        event
            .bucket
            .as_deref()
            .filter(|bucket| *bucket != self.config.source_bucket)
    }

    /// Fetch → render → store. Nothing is written unless the encode finished.
    async fn handle_created(&self, key: &str) -> Result<Option<Thumbnail>, RecordError> {
        let bucket = &self.config.source_bucket;
        let content = self
            .source
            .get(bucket, key)
            .await
            .map_err(|source| RecordError::Fetch {
                bucket: bucket.clone(),
                key: key.to_string(),
                source,
            })?;

        let Some(thumb) = self
            .pipeline
            .clone()
            .process_blocking(SourceObject::new(key, content))
            .await?
        else {
            return Ok(None);
        };

        let bucket = &self.config.destination_bucket;
        self.destination
            .put(bucket, &thumb.key, thumb.data.clone(), thumb.content_type())
            .await
            .map_err(|source| RecordError::Store {
                bucket: bucket.clone(),
                key: thumb.key.clone(),
                source,
            })?;

        Ok(Some(thumb))
    }

    async fn handle_removed(&self, key: &str) -> Result<(), RecordError> {
        let bucket = &self.config.destination_bucket;
        self.destination
            .delete(bucket, key)
            .await
            .map_err(|source| RecordError::Store {
                bucket: bucket.clone(),
                key: key.to_string(),
                source,
            })
    }
}

fn failure(err: RecordError) -> RecordOutcome {
    let kind = err.kind();
    error!(?kind, "record failed: {}", err);
    RecordOutcome::failed(kind, err.to_string())
}

/// Group events by key, keeping first-seen key order and delivery order
/// within each key.
fn group_by_key(events: Vec<ChangeEvent>) -> Vec<Vec<ChangeEvent>> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<ChangeEvent>> = Vec::new();
    for event in events {
        match slots.get(&event.key) {
            Some(&slot) => groups[slot].push(event),
            None => {
                slots.insert(event.key.clone(), groups.len());
                groups.push(vec![event]);
            }
        }
    }
    groups
}
