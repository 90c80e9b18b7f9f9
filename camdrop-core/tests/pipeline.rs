use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use camdrop_core::store::{BoundedPush, EvictingPush};
use camdrop_core::{
    CameraDirectory, CameraRegistry, DebounceScheduler, DedupeCache, FileEvent, InMemoryStore,
    IngestConfig, IngestOutcome, IngestPipeline, NewCamera, OverflowPolicy, QueueAdmissionClient,
    QueueBackend, Result, ValidationError,
};
use image::{ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingDirectory {
    created: Mutex<Vec<NewCamera>>,
    /// Never answer, like a collaborator stuck on a dead connection.
    stalled: AtomicBool,
}

#[async_trait]
impl CameraDirectory for RecordingDirectory {
    async fn create_camera(&self, camera: &NewCamera) -> Result<()> {
        self.created.lock().push(camera.clone());
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Counts bounded pushes, the primitive behind every admission.
struct CountingBackend {
    inner: InMemoryStore,
    admissions: AtomicUsize,
}

#[async_trait]
impl QueueBackend for CountingBackend {
    async fn len(&self, queue: &str) -> Result<usize> {
        self.inner.len(queue).await
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<usize> {
        self.inner.push(queue, payload).await
    }

    async fn push_bounded(
        &self,
        queue: &str,
        payload: &str,
        max_len: usize,
    ) -> Result<BoundedPush> {
        self.admissions.fetch_add(1, Ordering::SeqCst);
        self.inner.push_bounded(queue, payload, max_len).await
    }

    async fn push_evicting(
        &self,
        queue: &str,
        payload: &str,
        max_len: usize,
    ) -> Result<EvictingPush> {
        self.admissions.fetch_add(1, Ordering::SeqCst);
        self.inner.push_evicting(queue, payload, max_len).await
    }

    async fn pop(&self, queue: &str) -> Result<Option<String>> {
        self.inner.pop(queue).await
    }

    async fn range(&self, queue: &str, start: usize, stop: usize) -> Result<Vec<String>> {
        self.inner.range(queue, start, stop).await
    }

    async fn clear(&self, queue: &str) -> Result<()> {
        self.inner.clear(queue).await
    }
}

struct Harness {
    _dir: TempDir,
    root: PathBuf,
    directory: Arc<RecordingDirectory>,
    backend: Arc<CountingBackend>,
    pipeline: Arc<IngestPipeline>,
}

impl Harness {
    fn new(tweak: impl FnOnce(&mut IngestConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let mut config = IngestConfig::default();
        config.watch.root = root.clone();
        config.watch.debounce_ms = 10;
        config.stability.window_ms = 20;
        config.stability.poll_interval_ms = 5;
        config.stability.max_attempts = 40;
        tweak(&mut config);
        let config = Arc::new(config);

        let markers = Arc::new(InMemoryStore::new());
        let backend = Arc::new(CountingBackend {
            inner: InMemoryStore::new(),
            admissions: AtomicUsize::new(0),
        });
        let directory = Arc::new(RecordingDirectory::default());

        let pipeline = Arc::new(IngestPipeline::new(
            Arc::clone(&config),
            Arc::new(
                CameraRegistry::new(directory.clone())
                    .with_registration_timeout(config.camera.registration_timeout()),
            ),
            Arc::new(DedupeCache::new(markers, config.dedupe.clone())),
            Arc::new(QueueAdmissionClient::new(
                backend.clone(),
                config.queue.clone(),
                config.breaker,
            )),
        ));

        Self {
            _dir: dir,
            root,
            directory,
            backend,
            pipeline,
        }
    }

    fn upload(&self, camera: &str, name: &str, bytes: &[u8]) -> PathBuf {
        let folder = self.root.join(camera);
        std::fs::create_dir_all(&folder).unwrap();
        let path = folder.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    async fn ingest(&self, path: &Path) -> IngestOutcome {
        self.pipeline
            .ingest(&FileEvent::new(path), &CancellationToken::new())
            .await
    }

    fn queue_name(&self) -> String {
        self.pipeline.queue().config().name.clone()
    }
}

/// Noise-filled JPEG, large enough to clear the default size floor.
fn camera_jpeg(seed: u32) -> Vec<u8> {
    let mut state = seed;
    let img = RgbImage::from_fn(160, 160, |_, _| {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let [a, b, c, _] = state.to_le_bytes();
        Rgb([a, b, c])
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
    let bytes = buf.into_inner();
    assert!(bytes.len() > 10 * 1024, "fixture too small: {}", bytes.len());
    bytes
}

#[tokio::test]
async fn front_door_upload_registers_camera_and_is_admitted() {
    let harness = Harness::new(|_| {});
    let path = harness.upload("Front Door", "IMG_0001.jpg", &camera_jpeg(1));

    let outcome = harness.ingest(&path).await;
    assert!(outcome.is_admitted(), "unexpected outcome {outcome:?}");

    let created = harness.directory.created.lock().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].id, "front_door");
    assert_eq!(created[0].display_name, "Front Door");

    let payload = harness
        .pipeline
        .queue()
        .dequeue(&harness.queue_name())
        .await
        .unwrap()
        .expect("payload queued");
    assert_eq!(payload.camera_id, "front_door");
    assert_eq!(payload.file_path, path);
    assert_eq!(payload.timestamp, payload.pipeline_start_time);
    assert_eq!(payload.file_hash.as_deref().map(str::len), Some(64));

    // Second upload from the same camera does not re-register it.
    let second = harness.upload("Front Door", "IMG_0002.jpg", &camera_jpeg(2));
    assert!(harness.ingest(&second).await.is_admitted());
    assert_eq!(harness.directory.created.lock().len(), 1);
}

#[tokio::test]
async fn stalled_camera_directory_does_not_block_admission() {
    let harness = Harness::new(|cfg| cfg.camera.registration_timeout_ms = 100);
    harness.directory.stalled.store(true, Ordering::SeqCst);
    let path = harness.upload("Back Gate", "IMG_0001.jpg", &camera_jpeg(21));

    let outcome = tokio::time::timeout(Duration::from_secs(10), harness.ingest(&path))
        .await
        .expect("ingest finishes despite the stalled directory");
    assert!(outcome.is_admitted(), "unexpected outcome {outcome:?}");
    assert_eq!(harness.directory.created.lock().len(), 1);
    assert!(harness.pipeline.registry().is_registered("back_gate"));
}

#[tokio::test]
async fn rapid_events_are_admitted_once() {
    let harness = Harness::new(|_| {});
    let path = harness.upload("Driveway", "burst.jpg", &camera_jpeg(3));
    let scheduler = DebounceScheduler::new(Duration::from_millis(10), harness.pipeline.clone());

    scheduler.schedule(FileEvent::new(&path));
    tokio::time::sleep(Duration::from_millis(5)).await;
    scheduler.schedule(FileEvent::new(&path));

    for _ in 0..200 {
        if scheduler.pending_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(scheduler.pending_count(), 0);
    assert_eq!(harness.backend.admissions.load(Ordering::SeqCst), 1);
    assert_eq!(harness.backend.len(&harness.queue_name()).await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_content_is_not_readmitted() {
    let harness = Harness::new(|_| {});
    let bytes = camera_jpeg(4);
    let first = harness.upload("Garage", "a.jpg", &bytes);
    let copy = harness.upload("Garage", "b.jpg", &bytes);

    assert!(harness.ingest(&first).await.is_admitted());
    match harness.ingest(&copy).await {
        IngestOutcome::Duplicate { fingerprint } => assert_eq!(fingerprint.len(), 64),
        other => panic!("expected duplicate, got {other:?}"),
    }
    assert_eq!(harness.backend.len(&harness.queue_name()).await.unwrap(), 1);
}

#[tokio::test]
async fn disabled_dedupe_admits_copies_without_hash() {
    let harness = Harness::new(|cfg| cfg.dedupe.enabled = false);
    let bytes = camera_jpeg(5);
    let first = harness.upload("Garage", "a.jpg", &bytes);
    let copy = harness.upload("Garage", "b.jpg", &bytes);

    assert!(harness.ingest(&first).await.is_admitted());
    assert!(harness.ingest(&copy).await.is_admitted());

    let payload = harness
        .pipeline
        .queue()
        .dequeue(&harness.queue_name())
        .await
        .unwrap()
        .unwrap();
    assert!(payload.file_hash.is_none());
}

#[tokio::test]
async fn rejected_upload_can_be_retried_later() {
    let harness = Harness::new(|cfg| {
        cfg.queue.max_size = 1;
        cfg.queue.overflow_policy = OverflowPolicy::Reject;
    });
    let first = harness.upload("Porch", "a.jpg", &camera_jpeg(6));
    let second = harness.upload("Porch", "b.jpg", &camera_jpeg(7));

    assert!(harness.ingest(&first).await.is_admitted());
    assert!(matches!(
        harness.ingest(&second).await,
        IngestOutcome::Rejected(message) if !message.is_empty()
    ));

    // Consumer drains the queue; the refused content is not a duplicate now.
    harness
        .pipeline
        .queue()
        .dequeue(&harness.queue_name())
        .await
        .unwrap();
    assert!(harness.ingest(&second).await.is_admitted());
}

#[tokio::test]
async fn full_queue_with_dlq_policy_parks_upload() {
    let harness = Harness::new(|cfg| cfg.queue.max_size = 1);
    let first = harness.upload("Porch", "a.jpg", &camera_jpeg(8));
    let second = harness.upload("Porch", "b.jpg", &camera_jpeg(9));

    assert!(harness.ingest(&first).await.is_admitted());
    match harness.ingest(&second).await {
        IngestOutcome::Admitted(result) => {
            assert_eq!(result.moved_to_dlq_count, 1);
            assert!(result.warning.is_some());
        }
        other => panic!("expected dead-letter admission, got {other:?}"),
    }

    let parked = harness
        .pipeline
        .queue()
        .dead_letter_items(&harness.queue_name(), 10)
        .await
        .unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].file_path, second);
}

#[tokio::test]
async fn invalid_and_misplaced_files_are_dropped() {
    let harness = Harness::new(|_| {});
    let corrupt = harness.upload("Side Gate", "broken.jpg", &vec![0x5a; 20 * 1024]);
    assert!(matches!(
        harness.ingest(&corrupt).await,
        IngestOutcome::Invalid(ValidationError::Corrupt(_))
    ));

    let loose = harness.root.join("loose.jpg");
    std::fs::write(&loose, camera_jpeg(10)).unwrap();
    assert_eq!(harness.ingest(&loose).await, IngestOutcome::NoCamera);

    let unnamed = harness.upload("!!!", "c.jpg", &camera_jpeg(11));
    assert_eq!(harness.ingest(&unnamed).await, IngestOutcome::NoCamera);

    assert_eq!(harness.backend.admissions.load(Ordering::SeqCst), 0);
    assert!(harness.directory.created.lock().is_empty());
}

#[tokio::test]
async fn vanished_upload_is_unstable() {
    let harness = Harness::new(|_| {});
    let ghost = harness.root.join("Porch").join("gone.jpg");
    assert_eq!(harness.ingest(&ghost).await, IngestOutcome::Unstable);
}

#[tokio::test]
async fn cancelled_attempt_leaves_no_marker_behind() {
    let harness = Harness::new(|_| {});
    let path = harness.upload("Porch", "a.jpg", &camera_jpeg(12));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = harness.pipeline.ingest(&FileEvent::new(&path), &cancel).await;
    assert_eq!(outcome, IngestOutcome::Cancelled);

    assert!(harness.ingest(&path).await.is_admitted());
}
