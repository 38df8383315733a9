use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use stowage_backend::{BackendError, BackendRegistry};
use stowage_cache::TransferCache;
use stowage_lock::{LockConfig, LockHandle, LockManager};
use stowage_types::{ContentDigest, Scheme, TypeError, Uri};
use stowage_walker::{ContentType, StructuredWalker, WalkError};
use tracing::{debug, info, warn};

use crate::config::{LocalizeConfig, StowageConfig};
use crate::error::{LocalizeError, LocalizeResult};
use crate::manifest::Manifest;
use crate::report::{LocalizeReport, Localized};
use crate::transfer::Transfer;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// State private to one top-level call.
#[derive(Default)]
struct CallState {
    manifest: Manifest,
    report: LocalizeReport,
}

/// What gets written to a destination under its lock.
enum Payload<'a> {
    /// Copy of an existing object.
    Object(&'a Uri),
    /// Bytes produced by rewriting a document.
    Generated(Bytes),
}

/// The localization engine.
///
/// Cheap to share behind an `Arc`; each call keeps its own manifest, so
/// concurrent calls only coordinate through destination locks.
#[derive(Clone, Debug)]
pub struct Localizer {
    registry: BackendRegistry,
    locks: LockManager,
    cache: TransferCache,
    transfer: Transfer,
    walker: StructuredWalker,
    config: LocalizeConfig,
}

impl Localizer {
    pub fn new(registry: BackendRegistry, lock: LockConfig, config: LocalizeConfig) -> Self {
        Self {
            locks: LockManager::new(registry.clone(), lock),
            cache: TransferCache::new(registry.clone()),
            transfer: Transfer::new(registry.clone(), &config),
            walker: StructuredWalker::default(),
            registry,
            config,
        }
    }

    /// Build the registry and engine from a full configuration.
    pub fn from_config(config: &StowageConfig) -> LocalizeResult<Self> {
        let registry = BackendRegistry::from_config(&config.backends)?;
        Ok(Self::new(
            registry,
            config.lock.clone(),
            config.localize.clone(),
        ))
    }

    /// Replace the walker, e.g. to change which extensions are structured.
    pub fn with_walker(mut self, walker: StructuredWalker) -> Self {
        self.walker = walker;
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    pub fn config(&self) -> &LocalizeConfig {
        &self.config
    }

    /// Where `source` lands under `target_dir`: its relative path re-rooted.
    ///
    /// Fails with [`LocalizeError::InvalidUri`] if the relative path holds
    /// `.` or `..` segments or would otherwise leave `target_dir`.
    pub fn destination_for(&self, source: &Uri, target_dir: &Uri) -> LocalizeResult<Uri> {
        Ok(target_dir.join_within(&source.relative_path())?)
    }

    /// [`Localizer::destination_for`], moved aside when a different original
    /// in this call already holds that destination.
    ///
    /// The fallback keeps the bucket (or the scheme name, for sources without
    /// one) as the first segment: `gs://b2/a.txt` -> `<target>/b2/a.txt`.
    fn claim_destination(
        &self,
        source: &Uri,
        target_dir: &Uri,
        manifest: &Manifest,
    ) -> LocalizeResult<Uri> {
        let destination = self.destination_for(source, target_dir)?;
        let Some(owner) = manifest.claimant(&destination).filter(|o| *o != source) else {
            return Ok(destination);
        };
        let root = if source.scheme().is_object_store() {
            source.authority()
        } else {
            source.scheme().name()
        };
        let qualified =
            target_dir.join_within(&format!("{root}/{}", source.relative_path()))?;
        debug!(%source, %owner, taken = %destination, %qualified, "destination already claimed");
        unclaimed(source, qualified, manifest)
    }

    /// Localize `source` into `target_dir`.
    ///
    /// With `recursive`, structured documents have their references localized
    /// too and are written with those references substituted.
    pub async fn localize(
        &self,
        source: &Uri,
        target_dir: &Uri,
        recursive: bool,
    ) -> LocalizeResult<Localized> {
        let mut state = CallState::default();
        debug!(%source, %target_dir, recursive, "localize");
        let uri = self
            .localize_entry(source, target_dir, recursive, &mut state)
            .await?;
        let report = state.report;
        info!(
            %source,
            localized = %uri,
            transfers = report.transfers,
            skips = report.skips,
            rewritten = report.rewritten,
            "localized"
        );
        Ok(Localized {
            uri,
            manifest: state.manifest,
            report,
        })
    }

    /// String form of [`Localizer::localize`], returning the localized URI.
    pub async fn localize_str(
        &self,
        source: &str,
        target_dir: &str,
        recursive: bool,
    ) -> LocalizeResult<String> {
        let source = Uri::parse(source)?;
        let target_dir = Uri::parse(target_dir)?;
        let localized = self.localize(&source, &target_dir, recursive).await?;
        Ok(localized.uri.to_string())
    }

    /// Copy one object to an explicit destination, under the destination's
    /// lock and subject to the transfer cache. No re-rooting or recursion.
    pub async fn copy(&self, source: &Uri, destination: &Uri) -> LocalizeResult<LocalizeReport> {
        if destination.scheme().is_read_only() {
            return Err(LocalizeError::CrossSchemeUnsupported {
                from: source.clone(),
                to: destination.clone(),
                reason: "destination is read-only".to_string(),
            });
        }
        let mut report = LocalizeReport::default();
        self.deliver(Payload::Object(source), destination, &mut report)
            .await?;
        Ok(report)
    }

    fn localize_entry<'a>(
        &'a self,
        source: &'a Uri,
        target_dir: &'a Uri,
        recursive: bool,
        state: &'a mut CallState,
    ) -> BoxFuture<'a, LocalizeResult<Uri>> {
        Box::pin(async move {
            if let Some(done) = state.manifest.get(source) {
                debug!(%source, localized = %done, "already mapped");
                return Ok(done.clone());
            }

            if target_dir.scheme().is_read_only() {
                let (uri, signed) = self.presign(source, target_dir).await?;
                if signed {
                    state.report.presigned += 1;
                }
                state.manifest.insert(source.clone(), uri.clone());
                return Ok(uri);
            }

            let destination = self.claim_destination(source, target_dir, &state.manifest)?;
            let content_type = if recursive {
                self.walker.content_type(source)
            } else {
                None
            };
            match content_type {
                Some(content_type) => {
                    self.localize_document(source, destination, target_dir, content_type, state)
                        .await
                }
                None => {
                    state.manifest.insert(source.clone(), destination.clone());
                    self.deliver(Payload::Object(source), &destination, &mut state.report)
                        .await?;
                    Ok(destination)
                }
            }
        })
    }

    /// Localize every reference of a document, then write the rewritten
    /// document. Children are done before this document's lock is taken.
    async fn localize_document(
        &self,
        source: &Uri,
        destination: Uri,
        target_dir: &Uri,
        content_type: ContentType,
        state: &mut CallState,
    ) -> LocalizeResult<Uri> {
        let content = self.registry.resolve(source)?.read(source).await?;
        let children = self
            .walker
            .children(&content, content_type)
            .map_err(|e| unparsable(source, e))?;

        // Pre-assigned so a reference cycle back to this document terminates.
        state.manifest.insert(source.clone(), destination.clone());

        let mut mapped = HashMap::with_capacity(children.len());
        for child in &children {
            let localized = self.localize_entry(child, target_dir, true, state).await?;
            mapped.insert(child.clone(), localized.to_string());
        }

        let rewritten = self
            .walker
            .rewrite(content, content_type, &|uri| mapped.get(uri).cloned())
            .map_err(|e| unparsable(source, e))?;

        if rewritten.changed == 0 {
            self.deliver(Payload::Object(source), &destination, &mut state.report)
                .await?;
            return Ok(destination);
        }

        // Never overwrite the original with its rewritten form.
        let destination = if destination == *source {
            let renamed = destination.with_stem_suffix(target_dir.scheme().rewrite_suffix());
            unclaimed(source, renamed, &state.manifest)?
        } else {
            destination
        };
        debug!(%source, %destination, substituted = rewritten.changed, "rewrote references");
        state.manifest.insert(source.clone(), destination.clone());
        state.report.rewritten += 1;
        self.deliver(
            Payload::Generated(rewritten.bytes),
            &destination,
            &mut state.report,
        )
        .await?;
        Ok(destination)
    }

    /// Write `payload` to `destination` under its lock, unless the
    /// destination already holds the same content.
    ///
    /// The lock is released on every path; a release failure is reported
    /// only if the write itself succeeded.
    async fn deliver(
        &self,
        payload: Payload<'_>,
        destination: &Uri,
        report: &mut LocalizeReport,
    ) -> LocalizeResult<()> {
        let handle = self.acquire(destination, report).await?;
        let outcome = match payload {
            Payload::Object(source) => self.copy_if_changed(source, destination, report).await,
            Payload::Generated(content) => {
                self.write_if_changed(content, destination, report).await
            }
        };
        let released = handle.release().await;
        outcome?;
        released?;
        Ok(())
    }

    async fn acquire(
        &self,
        destination: &Uri,
        report: &mut LocalizeReport,
    ) -> LocalizeResult<LockHandle> {
        let handle = self.locks.acquire(destination).await?;
        if handle.overrode_stale() {
            report.stale_overrides += handle.stale_overrides() as usize;
            warn!(%destination, "took over a stale lock");
        }
        Ok(handle)
    }

    async fn copy_if_changed(
        &self,
        source: &Uri,
        destination: &Uri,
        report: &mut LocalizeReport,
    ) -> LocalizeResult<()> {
        let decision = self.cache.check(source, destination).await?;
        if decision.skip {
            report.skips += 1;
            debug!(%source, %destination, "destination up to date");
            return Ok(());
        }
        let route = self.transfer.copy(source, destination).await?;
        let written = self.cache.observed(destination).await?;
        if written != decision.source_digest {
            warn!(
                %source,
                %destination,
                expected = %decision.source_digest,
                %written,
                "destination digest differs from source after copy"
            );
        }
        self.cache.record(destination, written).await?;
        report.transfers += 1;
        info!(%source, %destination, ?route, "transferred");
        Ok(())
    }

    async fn write_if_changed(
        &self,
        content: Bytes,
        destination: &Uri,
        report: &mut LocalizeReport,
    ) -> LocalizeResult<()> {
        let digest = ContentDigest::compute(&content);
        if self.cache.matches(digest, destination).await? {
            report.skips += 1;
            debug!(%destination, "rewritten document up to date");
            return Ok(());
        }
        let len = content.len();
        self.registry
            .resolve(destination)?
            .write(destination, content)
            .await?;
        self.cache.record(destination, digest).await?;
        report.transfers += 1;
        info!(%destination, bytes = len, "wrote rewritten document");
        Ok(())
    }

    /// Resolve `source` for a read-only (HTTP) target: a URL stays as it
    /// is, a local file under a mapped directory takes its served URL, and
    /// anything else becomes a presigned URL. The flag is `true` when a URL
    /// was signed.
    async fn presign(&self, source: &Uri, target_dir: &Uri) -> LocalizeResult<(Uri, bool)> {
        if source.scheme().is_read_only() {
            return Ok((source.clone(), false));
        }
        let backend = self.registry.resolve(source)?;
        if !backend.exists(source).await? {
            return Err(LocalizeError::NotFound(source.clone()));
        }
        if source.scheme() == Scheme::Local {
            if let Some(url) = self.config.mapped_url(source.path()) {
                debug!(%source, %url, "served from a mapped directory");
                return Ok((Uri::parse(&url)?, false));
            }
        }
        match backend
            .presign(source, self.config.presign_duration())
            .await
        {
            Ok(url) => Ok((Uri::parse(&url)?, true)),
            Err(BackendError::Unsupported(reason)) => Err(LocalizeError::CrossSchemeUnsupported {
                from: source.clone(),
                to: target_dir.clone(),
                reason,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// `destination`, unless a different original already holds it.
fn unclaimed(source: &Uri, destination: Uri, manifest: &Manifest) -> LocalizeResult<Uri> {
    match manifest.claimant(&destination) {
        Some(owner) if owner != source => Err(TypeError::InvalidUri {
            uri: destination.to_string(),
            reason: format!("already localized from {owner}, cannot also hold {source}"),
        }
        .into()),
        _ => Ok(destination),
    }
}

fn unparsable(uri: &Uri, source: WalkError) -> LocalizeError {
    LocalizeError::UnparsableContent {
        uri: uri.clone(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use stowage_backend::{Backend, BackendResult, InMemoryBackend};
    use stowage_lock::{marker_uri, LockMarker};
    use stowage_types::Metadata;

    use super::*;
    use crate::error::ErrorKind;

    struct Fixture {
        gcs: Arc<InMemoryBackend>,
        s3: Arc<InMemoryBackend>,
        local: Arc<InMemoryBackend>,
        localizer: Localizer,
    }

    fn fast_locks() -> LockConfig {
        LockConfig {
            ttl_secs: 1800,
            timeout_secs: 10,
            poll_interval_ms: 2,
            max_poll_interval_ms: 20,
        }
    }

    fn fixture_with(lock: LockConfig, config: LocalizeConfig) -> Fixture {
        let gcs = Arc::new(InMemoryBackend::new(Scheme::Gcs));
        let s3 = Arc::new(InMemoryBackend::new(Scheme::S3));
        let local = Arc::new(InMemoryBackend::new(Scheme::Local));
        let registry = BackendRegistry::new()
            .with_backend(Scheme::Gcs, gcs.clone())
            .with_backend(Scheme::S3, s3.clone())
            .with_backend(Scheme::Local, local.clone());
        Fixture {
            gcs,
            s3,
            local,
            localizer: Localizer::new(registry, lock, config),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(fast_locks(), LocalizeConfig::default())
    }

    fn uri(s: &str) -> Uri {
        Uri::parse(s).unwrap()
    }

    fn physical_writes(backends: &[&InMemoryBackend]) -> usize {
        backends.iter().map(|b| b.write_count() + b.copy_count()).sum()
    }

    #[tokio::test]
    async fn table_row_is_rewritten_to_local_copy() {
        let f = fixture();
        f.gcs.insert(&uri("gs://bucket/a.txt"), "alpha");
        f.gcs.insert(&uri("gs://bucket/t.tsv"), "id\tgs://bucket/a.txt\n");

        let out = f
            .localizer
            .localize(&uri("gs://bucket/t.tsv"), &uri("local:///out/"), true)
            .await
            .unwrap();

        assert_eq!(out.uri.to_string(), "local:///out/t.tsv");
        assert_eq!(
            &f.local.contents(&uri("local:///out/t.tsv")).unwrap()[..],
            b"id\tlocal:///out/a.txt\n"
        );
        assert_eq!(&f.local.contents(&uri("local:///out/a.txt")).unwrap()[..], b"alpha");
        assert_eq!(out.report.transfers, 2);
        assert_eq!(out.report.rewritten, 1);
        assert_eq!(
            out.manifest.get(&uri("gs://bucket/a.txt")),
            Some(&uri("local:///out/a.txt"))
        );
        // Locks are gone once the call returns.
        assert!(f.local.contents(&uri("local:///out/a.txt.lock")).is_none());
        assert!(f.local.contents(&uri("local:///out/t.tsv.lock")).is_none());
    }

    #[tokio::test]
    async fn second_call_performs_no_transfers() {
        let f = fixture();
        f.gcs.insert(&uri("gs://bucket/a.txt"), "alpha");
        f.gcs.insert(&uri("gs://bucket/t.tsv"), "id\tgs://bucket/a.txt\n");
        let source = uri("gs://bucket/t.tsv");
        let target = uri("local:///out");

        let first = f.localizer.localize(&source, &target, true).await.unwrap();
        for b in [&f.gcs, &f.s3, &f.local] {
            b.reset_counters();
        }
        let second = f.localizer.localize(&source, &target, true).await.unwrap();

        assert_eq!(second.uri, first.uri);
        assert_eq!(physical_writes(&[&f.gcs, &f.s3, &f.local]), 0);
        assert_eq!(second.report.transfers, 0);
        assert_eq!(second.report.skips, 2);
    }

    #[tokio::test]
    async fn identical_destination_is_not_rewritten() {
        let f = fixture();
        f.gcs.insert(&uri("gs://bucket/dir/a.bin"), "same");
        f.local.insert(&uri("/out/dir/a.bin"), "same");

        let out = f
            .localizer
            .localize(&uri("gs://bucket/dir/a.bin"), &uri("/out"), false)
            .await
            .unwrap();
        assert_eq!(out.uri, uri("/out/dir/a.bin"));
        assert_eq!(out.report.skips, 1);
        assert_eq!(f.local.write_count(), 0);
    }

    #[tokio::test]
    async fn changed_destination_is_overwritten() {
        let f = fixture();
        f.gcs.insert(&uri("gs://bucket/a.bin"), "new");
        f.local.insert(&uri("/out/a.bin"), "old");

        let out = f
            .localizer
            .localize(&uri("gs://bucket/a.bin"), &uri("/out"), false)
            .await
            .unwrap();
        assert_eq!(out.report.transfers, 1);
        assert_eq!(&f.local.contents(&uri("/out/a.bin")).unwrap()[..], b"new");
        assert!(f.local.contents(&uri("/out/a.bin.md5")).is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_transfer_once() {
        let f = fixture();
        let payload = vec![7u8; 64 * 1024];
        f.gcs.insert(&uri("gs://bucket/big.bin"), payload.clone());
        let localizer = Arc::new(f.localizer);

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let localizer = localizer.clone();
            tasks.push(tokio::spawn(async move {
                localizer
                    .localize(&uri("gs://bucket/big.bin"), &uri("/out"), true)
                    .await
                    .unwrap()
                    .report
            }));
        }
        let mut total = LocalizeReport::default();
        for task in tasks {
            total += task.await.unwrap();
        }

        assert_eq!(total.transfers, 1);
        assert_eq!(total.skips, 5);
        assert_eq!(&f.local.contents(&uri("/out/big.bin")).unwrap()[..], &payload[..]);
    }

    #[tokio::test]
    async fn stale_lock_is_taken_over() {
        let f = fixture();
        f.gcs.insert(&uri("gs://bucket/a.txt"), "alpha");
        let abandoned = LockMarker {
            owner_id: uuid::Uuid::now_v7(),
            acquired_at: chrono::Utc::now() - chrono::Duration::hours(3),
            ttl_secs: 1800,
        };
        f.local
            .insert(&marker_uri(&uri("/out/a.txt")), abandoned.to_bytes().unwrap());

        let out = f
            .localizer
            .localize(&uri("gs://bucket/a.txt"), &uri("/out"), false)
            .await
            .unwrap();
        assert_eq!(out.report.stale_overrides, 1);
        assert_eq!(out.report.transfers, 1);
        assert!(f.local.contents(&uri("/out/a.txt.lock")).is_none());
    }

    #[tokio::test]
    async fn live_lock_times_out_without_writing() {
        let f = fixture_with(
            LockConfig {
                timeout_secs: 0,
                ..fast_locks()
            },
            LocalizeConfig::default(),
        );
        f.gcs.insert(&uri("gs://bucket/a.txt"), "alpha");
        let holder = LockMarker::new(Duration::from_secs(3600));
        f.local
            .insert(&marker_uri(&uri("/out/a.txt")), holder.to_bytes().unwrap());

        let err = f
            .localizer
            .localize(&uri("gs://bucket/a.txt"), &uri("/out"), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockTimeout);
        assert!(f.local.contents(&uri("/out/a.txt")).is_none());
        assert_eq!(f.local.write_count(), 0);
    }

    #[tokio::test]
    async fn repeated_and_cyclic_references_localize_once() {
        let f = fixture();
        f.gcs.insert(&uri("gs://bucket/a.txt"), "alpha");
        f.gcs.insert(
            &uri("gs://bucket/j1.json"),
            r#"["gs://bucket/a.txt", "gs://bucket/a.txt", "gs://bucket/j2.json"]"#,
        );
        f.gcs.insert(
            &uri("gs://bucket/j2.json"),
            r#"{"parent": "gs://bucket/j1.json", "data": "gs://bucket/a.txt"}"#,
        );

        let out = f
            .localizer
            .localize(&uri("gs://bucket/j1.json"), &uri("/out"), true)
            .await
            .unwrap();

        assert_eq!(out.manifest.len(), 3);
        assert_eq!(out.report.transfers, 3);
        assert_eq!(out.report.rewritten, 2);

        let j1: serde_json::Value =
            serde_json::from_slice(&f.local.contents(&uri("/out/j1.json")).unwrap()).unwrap();
        assert_eq!(
            j1,
            serde_json::json!(["local:///out/a.txt", "local:///out/a.txt", "local:///out/j2.json"])
        );
        let j2: serde_json::Value =
            serde_json::from_slice(&f.local.contents(&uri("/out/j2.json")).unwrap()).unwrap();
        assert_eq!(j2["parent"], "local:///out/j1.json");
        assert_eq!(j2["data"], "local:///out/a.txt");
    }

    #[tokio::test]
    async fn remote_to_remote_goes_through_staging() {
        let staging = tempfile::tempdir().unwrap();
        let f = fixture_with(
            fast_locks(),
            LocalizeConfig {
                staging_dir: Some(staging.path().to_path_buf()),
                ..Default::default()
            },
        );
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
        f.gcs.insert(&uri("gs://bucket/x/data.bin"), payload.clone());

        let out = f
            .localizer
            .localize(&uri("gs://bucket/x/data.bin"), &uri("s3://mirror/loc"), true)
            .await
            .unwrap();
        assert_eq!(out.uri.to_string(), "s3://mirror/loc/x/data.bin");
        assert_eq!(&f.s3.contents(&out.uri).unwrap()[..], &payload[..]);
    }

    #[tokio::test]
    async fn remote_to_remote_without_staging_is_unsupported() {
        let f = fixture_with(
            fast_locks(),
            LocalizeConfig {
                allow_local_staging: false,
                ..Default::default()
            },
        );
        f.gcs.insert(&uri("gs://bucket/a.txt"), "alpha");
        let err = f
            .localizer
            .localize(&uri("gs://bucket/a.txt"), &uri("s3://mirror"), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CrossSchemeUnsupported);
        assert!(f.s3.contents(&uri("s3://mirror/a.txt")).is_none());
    }

    #[tokio::test]
    async fn unparsable_document_is_not_written() {
        let f = fixture();
        f.gcs.insert(&uri("gs://bucket/bad.json"), "{oops");

        let err = f
            .localizer
            .localize(&uri("gs://bucket/bad.json"), &uri("/out"), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnparsableContent);
        assert!(f.local.is_empty());
    }

    #[tokio::test]
    async fn failed_child_leaves_earlier_siblings() {
        let f = fixture();
        f.gcs.insert(&uri("gs://bucket/a.txt"), "alpha");
        f.gcs.insert(&uri("gs://bucket/bad.json"), "[1,");
        f.gcs.insert(
            &uri("gs://bucket/t.tsv"),
            "gs://bucket/a.txt\ngs://bucket/bad.json\n",
        );

        let err = f
            .localizer
            .localize(&uri("gs://bucket/t.tsv"), &uri("/out"), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnparsableContent);
        assert!(f.local.contents(&uri("/out/a.txt")).is_some());
        assert!(f.local.contents(&uri("/out/t.tsv")).is_none());
    }

    #[tokio::test]
    async fn missing_source_is_not_found() {
        let f = fixture();
        let err = f
            .localizer
            .localize(&uri("gs://bucket/none.txt"), &uri("/out"), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn non_recursive_copies_documents_verbatim() {
        let f = fixture();
        f.gcs.insert(&uri("gs://bucket/t.tsv"), "id\tgs://bucket/a.txt\n");
        let out = f
            .localizer
            .localize(&uri("gs://bucket/t.tsv"), &uri("/out"), false)
            .await
            .unwrap();
        assert_eq!(out.report.rewritten, 0);
        assert_eq!(
            &f.local.contents(&uri("/out/t.tsv")).unwrap()[..],
            b"id\tgs://bucket/a.txt\n"
        );
    }

    #[tokio::test]
    async fn rewritten_copy_never_replaces_its_source() {
        let f = fixture();
        f.s3.insert(&uri("s3://other/a.txt"), "alpha");
        f.gcs.insert(&uri("gs://bucket/j1.json"), r#"["s3://other/a.txt"]"#);
        f.gcs.insert(&uri("gs://bucket/plain.json"), r#"{"n": 1}"#);

        let out = f
            .localizer
            .localize(&uri("gs://bucket/j1.json"), &uri("gs://bucket/"), true)
            .await
            .unwrap();
        assert_eq!(out.uri.to_string(), "gs://bucket/j1.gcs.json");
        assert_eq!(
            &f.gcs.contents(&uri("gs://bucket/j1.json")).unwrap()[..],
            br#"["s3://other/a.txt"]"#
        );
        assert_eq!(&f.gcs.contents(&uri("gs://bucket/a.txt")).unwrap()[..], b"alpha");

        let plain = f
            .localizer
            .localize(&uri("gs://bucket/plain.json"), &uri("gs://bucket/"), true)
            .await
            .unwrap();
        assert_eq!(plain.uri.to_string(), "gs://bucket/plain.json");
        assert_eq!(plain.report.skips, 1);
    }

    #[tokio::test]
    async fn explicit_copy_is_locked_and_cached() {
        let f = fixture();
        f.gcs.insert(&uri("gs://bucket/a.txt"), "alpha");
        let src = uri("gs://bucket/a.txt");
        let dst = uri("s3://mirror/renamed.txt");

        let first = f.localizer.copy(&src, &dst).await.unwrap();
        let second = f.localizer.copy(&src, &dst).await.unwrap();
        assert_eq!((first.transfers, first.skips), (1, 0));
        assert_eq!((second.transfers, second.skips), (0, 1));
        assert_eq!(&f.s3.contents(&dst).unwrap()[..], b"alpha");

        let err = f
            .localizer
            .copy(&src, &uri("https://cdn.example/a.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CrossSchemeUnsupported);
    }

    #[tokio::test]
    async fn http_target_without_signer_is_unsupported() {
        let f = fixture();
        f.gcs.insert(&uri("gs://bucket/a.txt"), "alpha");
        let err = f
            .localizer
            .localize(&uri("gs://bucket/a.txt"), &uri("https://cdn.example/"), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CrossSchemeUnsupported);
    }

    #[tokio::test]
    async fn url_sources_stay_put_on_http_targets() {
        let f = fixture();
        let out = f
            .localizer
            .localize_str("https://host.example/a.txt?x=1", "https://cdn.example/", false)
            .await
            .unwrap();
        assert_eq!(out, "https://host.example/a.txt?x=1");
    }

    /// In-memory gs backend that can sign URLs.
    #[derive(Debug)]
    struct SigningBackend(InMemoryBackend);

    #[async_trait]
    impl Backend for SigningBackend {
        fn name(&self) -> &'static str {
            "signing"
        }
        async fn exists(&self, uri: &Uri) -> BackendResult<bool> {
            self.0.exists(uri).await
        }
        async fn stat(&self, uri: &Uri) -> BackendResult<Metadata> {
            self.0.stat(uri).await
        }
        async fn read(&self, uri: &Uri) -> BackendResult<Bytes> {
            self.0.read(uri).await
        }
        async fn write(&self, uri: &Uri, data: Bytes) -> BackendResult<()> {
            self.0.write(uri, data).await
        }
        async fn remove(&self, uri: &Uri) -> BackendResult<bool> {
            self.0.remove(uri).await
        }
        async fn presign(&self, uri: &Uri, expires_in: Duration) -> BackendResult<String> {
            Ok(format!(
                "https://Storage.Example/{}/{}?expires={}",
                uri.authority(),
                uri.path(),
                expires_in.as_secs()
            ))
        }
    }

    #[tokio::test]
    async fn http_target_presigns() {
        let gcs = InMemoryBackend::new(Scheme::Gcs);
        gcs.insert(&uri("gs://bucket/a.txt"), "alpha");
        let registry =
            BackendRegistry::new().with_backend(Scheme::Gcs, Arc::new(SigningBackend(gcs)));
        let localizer = Localizer::new(registry, fast_locks(), LocalizeConfig::default());

        let out = localizer
            .localize(&uri("gs://bucket/a.txt"), &uri("https://cdn.example/"), true)
            .await
            .unwrap();
        assert_eq!(
            out.uri.to_string(),
            "https://storage.example/bucket/a.txt?expires=4233600"
        );
        assert_eq!(out.report.presigned, 1);

        let err = localizer
            .localize(&uri("gs://bucket/missing"), &uri("https://cdn.example/"), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn caller_mistakes_have_their_own_kinds() {
        let f = fixture();
        let err = f
            .localizer
            .localize_str("relative/path", "/out", false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUri);

        let bare = Localizer::new(
            BackendRegistry::new(),
            fast_locks(),
            LocalizeConfig::default(),
        );
        let err = bare
            .localize(&uri("gs://bucket/a.txt"), &uri("/out"), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendNotConfigured);
    }

    #[tokio::test]
    async fn references_cannot_escape_the_target_directory() {
        let f = fixture();
        f.gcs.insert(&uri("gs://bucket/../../etc/evil.txt"), "payload");
        f.gcs.insert(
            &uri("gs://bucket/t.tsv"),
            "id\tgs://bucket/../../etc/evil.txt\n",
        );

        let err = f
            .localizer
            .localize(&uri("gs://bucket/t.tsv"), &uri("local:///out/"), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUri);
        assert!(f.local.contents(&uri("/etc/evil.txt")).is_none());
        assert!(f.local.contents(&uri("/etc/evil.txt.md5")).is_none());
        let out = uri("/out");
        assert!(f.local.all_uris().iter().all(|u| u.is_within(&out)));

        let err = f
            .localizer
            .destination_for(&uri("gs://bucket/../a.txt"), &out)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUri);
    }

    #[tokio::test]
    async fn same_key_in_two_buckets_gets_two_destinations() {
        let f = fixture();
        f.gcs.insert(&uri("gs://b1/a.txt"), "from-b1");
        f.gcs.insert(&uri("gs://b2/a.txt"), "from-b2");
        f.gcs.insert(
            &uri("gs://bucket/t.tsv"),
            "x\tgs://b1/a.txt\ny\tgs://b2/a.txt\n",
        );

        let out = f
            .localizer
            .localize(&uri("gs://bucket/t.tsv"), &uri("/out"), true)
            .await
            .unwrap();

        assert_eq!(
            &f.local.contents(&uri("/out/t.tsv")).unwrap()[..],
            b"x\tlocal:///out/a.txt\ny\tlocal:///out/b2/a.txt\n"
        );
        assert_eq!(&f.local.contents(&uri("/out/a.txt")).unwrap()[..], b"from-b1");
        assert_eq!(&f.local.contents(&uri("/out/b2/a.txt")).unwrap()[..], b"from-b2");

        let mut destinations: Vec<&Uri> = out.manifest.iter().map(|(_, l)| l).collect();
        let total = destinations.len();
        destinations.sort();
        destinations.dedup();
        assert_eq!(destinations.len(), total);
    }

    #[tokio::test]
    async fn unresolvable_destination_clash_fails() {
        let f = fixture();
        f.gcs.insert(&uri("gs://x/a.txt"), "x-root");
        f.gcs.insert(&uri("gs://x/b2/a.txt"), "x-nested");
        f.gcs.insert(&uri("gs://b2/a.txt"), "b2-root");
        f.gcs.insert(
            &uri("gs://bucket/t.tsv"),
            "gs://x/a.txt\ngs://x/b2/a.txt\ngs://b2/a.txt\n",
        );

        let err = f
            .localizer
            .localize(&uri("gs://bucket/t.tsv"), &uri("/out"), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidUri);
        assert_eq!(&f.local.contents(&uri("/out/a.txt")).unwrap()[..], b"x-root");
        assert_eq!(&f.local.contents(&uri("/out/b2/a.txt")).unwrap()[..], b"x-nested");
        assert!(f.local.contents(&uri("/out/t.tsv")).is_none());
    }

    #[tokio::test]
    async fn mapped_local_directory_is_served_by_url() {
        let mut config = LocalizeConfig::default();
        config
            .map_path_to_url
            .insert("/srv/www".to_string(), "https://files.example.org/".to_string());
        let f = fixture_with(fast_locks(), config);
        f.local.insert(&uri("/srv/www/data/a.txt"), "alpha");
        f.local.insert(&uri("/home/me/b.txt"), "beta");

        let out = f
            .localizer
            .localize(&uri("/srv/www/data/a.txt"), &uri("https://cdn.example/"), true)
            .await
            .unwrap();
        assert_eq!(out.uri.to_string(), "https://files.example.org/data/a.txt");
        assert_eq!(out.report.presigned, 0);

        let err = f
            .localizer
            .localize(&uri("/home/me/b.txt"), &uri("https://cdn.example/"), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CrossSchemeUnsupported);
    }

    /// Local backend that terminates every written object with a newline.
    #[derive(Debug)]
    struct NewlineBackend(InMemoryBackend);

    #[async_trait]
    impl Backend for NewlineBackend {
        fn name(&self) -> &'static str {
            "newline"
        }
        async fn exists(&self, uri: &Uri) -> BackendResult<bool> {
            self.0.exists(uri).await
        }
        async fn stat(&self, uri: &Uri) -> BackendResult<Metadata> {
            self.0.stat(uri).await
        }
        async fn read(&self, uri: &Uri) -> BackendResult<Bytes> {
            self.0.read(uri).await
        }
        async fn write(&self, uri: &Uri, data: Bytes) -> BackendResult<()> {
            let mut terminated = data.to_vec();
            terminated.push(b'\n');
            self.0.write(uri, Bytes::from(terminated)).await
        }
        async fn write_if_absent(&self, uri: &Uri, data: Bytes) -> BackendResult<bool> {
            self.0.write_if_absent(uri, data).await
        }
        async fn remove(&self, uri: &Uri) -> BackendResult<bool> {
            self.0.remove(uri).await
        }
    }

    #[tokio::test]
    async fn record_describes_the_bytes_written() {
        let gcs = Arc::new(InMemoryBackend::new(Scheme::Gcs));
        let local = Arc::new(NewlineBackend(InMemoryBackend::new(Scheme::Local)));
        gcs.insert(&uri("gs://bucket/a.txt"), "alpha");
        let registry = BackendRegistry::new()
            .with_backend(Scheme::Gcs, gcs.clone())
            .with_backend(Scheme::Local, local.clone());
        let localizer = Localizer::new(registry, fast_locks(), LocalizeConfig::default());

        let out = localizer
            .localize(&uri("gs://bucket/a.txt"), &uri("/out"), false)
            .await
            .unwrap();
        assert_eq!(out.report.transfers, 1);

        let written = local.0.contents(&uri("/out/a.txt")).unwrap();
        assert_eq!(&written[..], b"alpha\n");
        let record = local.0.contents(&uri("/out/a.txt.md5")).unwrap();
        let recorded = String::from_utf8(record.to_vec()).unwrap();
        assert!(recorded.starts_with(&ContentDigest::compute(&written).to_hex()));
        assert!(!recorded.starts_with(&ContentDigest::compute(b"alpha").to_hex()));
    }
}
