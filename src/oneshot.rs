//! `--event-file` mode: apply one notification batch from disk and exit.

use crate::{
    models::{event::NotificationBatch, report::BatchReport},
    services::dispatcher::EventDispatcher,
};
use anyhow::{Context, Result, bail};
use std::{io::Write, path::Path};
use tokio::fs;

/// Apply the batch in `path` and write the pretty-printed report to `out`.
///
/// Fails when the file cannot be read or parsed, and when any record failed
/// in a way a redelivery could fix, so the process exits non-zero.
pub async fn run_event_file(
    dispatcher: &EventDispatcher,
    path: &Path,
    out: &mut impl Write,
) -> Result<BatchReport> {
    let raw = fs::read(path)
        .await
        .with_context(|| format!("reading event file {}", path.display()))?;
    let batch: NotificationBatch = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing event file {}", path.display()))?;

    let report = dispatcher.dispatch(batch.into_events()).await;
    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;

    if report.has_retryable_failure() {
        bail!(
            "{} of {} records failed, at least one retryable",
            report.failed,
            report.processed
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        dispatcher::DispatcherConfig,
        document_rasterizer::{DEFAULT_DENSITY, DocumentRasterizer, UnavailableRasterizer},
        image_thumbnailer::ImageThumbnailer,
        pipeline::ThumbnailPipeline,
        raster::SizingPolicy,
        storage::{LocalObjectStore, ObjectStore},
    };
    use bytes::Bytes;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    async fn dispatcher(root: &TempDir) -> (EventDispatcher, LocalObjectStore) {
        let url = format!("sqlite://{}/meta/objects.db", root.path().display());
        let store = LocalObjectStore::open(&url, root.path().join("objects"))
            .await
            .unwrap();
        let policy = SizingPolicy::default();
        let pipeline = ThumbnailPipeline::new(
            ImageThumbnailer::new(policy),
            DocumentRasterizer::new(
                policy,
                DEFAULT_DENSITY,
                root.path(),
                Arc::new(UnavailableRasterizer::new("tests")),
            ),
        );
        let shared: Arc<dyn ObjectStore> = Arc::new(store.clone());
        let dispatcher = EventDispatcher::new(
            DispatcherConfig {
                source_bucket: "documents".into(),
                destination_bucket: "thumbnails".into(),
                concurrency: 4,
            },
            shared.clone(),
            shared,
            Arc::new(pipeline),
        );
        (dispatcher, store)
    }

    fn write_batch(root: &TempDir, records: &[(&str, &str)]) -> std::path::PathBuf {
        let records: Vec<Value> = records
            .iter()
            .map(|(event_name, key)| json!({ "eventName": event_name, "s3": { "object": { "key": key } } }))
            .collect();
        let path = root.path().join("batch.json");
        std::fs::write(&path, json!({ "Records": records }).to_string()).unwrap();
        path
    }

    #[tokio::test]
    async fn prints_report_and_succeeds_without_retryable_failures() {
        let root = tempdir().unwrap();
        let (dispatcher, store) = dispatcher(&root).await;
        store
            .put("documents", "notes.txt", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
        let path = write_batch(
            &root,
            &[("ObjectCreated:Put", "notes.txt"), ("ObjectRemoved:Delete", "gone.png")],
        );

        let mut out = Vec::new();
        let report = run_event_file(&dispatcher, &path, &mut out).await.unwrap();

        assert_eq!(report.processed, 2);
        let printed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed["message"], "success");
        assert_eq!(printed["records"][0]["status"], "skipped");
        assert_eq!(printed["records"][1]["status"], "deleted");
    }

    #[tokio::test]
    async fn retryable_failure_is_an_error_after_printing() {
        let root = tempdir().unwrap();
        let (dispatcher, _store) = dispatcher(&root).await;
        let path = write_batch(&root, &[("ObjectCreated:Put", "missing.jpg")]);

        let mut out = Vec::new();
        let err = run_event_file(&dispatcher, &path, &mut out)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("1 of 1 records failed"));
        let printed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed["records"][0]["error"], "FetchError");
    }

    #[tokio::test]
    async fn unreadable_or_malformed_file_is_an_error() {
        let root = tempdir().unwrap();
        let (dispatcher, _store) = dispatcher(&root).await;
        let mut out = Vec::new();

        let missing = run_event_file(&dispatcher, &root.path().join("absent.json"), &mut out)
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("reading event file"));

        let path = root.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let malformed = run_event_file(&dispatcher, &path, &mut out)
            .await
            .unwrap_err();
        assert!(malformed.to_string().contains("parsing event file"));
        assert!(out.is_empty());
    }
}
