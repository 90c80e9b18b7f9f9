//! Directory observer for the FTP upload tree.
//!
//! A thin wrapper around `notify` that filters raw notifications down to
//! files inside a camera folder and hands them to the [`DebounceScheduler`].
//! The notify callback runs on the watcher's own thread and crosses into the
//! runtime through a bounded channel.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use notify::event::{CreateKind, EventKind, MetadataKind, ModifyKind, RenameMode};
use notify::{
    Config as NotifyConfig, Event, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, spawn_blocking};
use tracing::{debug, info, warn};

pub mod debounce;

pub use debounce::{DebounceScheduler, FileEvent, PathProcessor};

use crate::camera::camera_folder;
use crate::config::WatchConfig;
use crate::error::{IngestError, Result};

/// Watches the upload root and schedules qualifying file events.
pub struct DirectoryObserver {
    config: WatchConfig,
    scheduler: DebounceScheduler,
}

impl fmt::Debug for DirectoryObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryObserver")
            .field("root", &self.config.root)
            .field("use_polling", &self.config.use_polling)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl DirectoryObserver {
    pub fn new(config: WatchConfig, scheduler: DebounceScheduler) -> Self {
        Self { config, scheduler }
    }

    pub fn scheduler(&self) -> &DebounceScheduler {
        &self.scheduler
    }

    /// Create the root if needed and start watching it recursively.
    ///
    /// Fails with [`IngestError::NoRuntime`] when polled outside a Tokio
    /// runtime, since both the dispatch loop and the scheduler spawn tasks.
    pub async fn start(&self) -> Result<ObserverHandle> {
        if Handle::try_current().is_err() {
            return Err(IngestError::NoRuntime);
        }

        let root = self.config.root.clone();
        tokio::fs::create_dir_all(&root).await?;
        let roots = resolve_roots(&root).await;

        let (tx, rx) = mpsc::channel::<WatchMessage>(self.config.channel_capacity.max(1));
        let watch_root = root.clone();
        let use_polling = self.config.use_polling;
        let poll_interval = self.config.poll_interval();
        let watcher = spawn_blocking(move || {
            init_watcher(&watch_root, use_polling, poll_interval, tx)
        })
        .await
        .map_err(|err| IngestError::Internal(format!("watcher initialization panicked: {err}")))??;

        let errors = Arc::new(AtomicU64::new(0));
        let dispatch = spawn_dispatch_loop(
            rx,
            roots.clone(),
            self.scheduler.clone(),
            Arc::clone(&errors),
            use_polling,
        );

        let scan = self
            .config
            .scan_existing_on_start
            .then(|| spawn_existing_scan(roots, self.scheduler.clone()));

        info!(
            root = %root.display(),
            mode = if use_polling { "polling" } else { "native" },
            "watching upload root"
        );

        Ok(ObserverHandle {
            root,
            watcher: Some(watcher),
            dispatch,
            scan,
            errors,
        })
    }
}

enum ActiveWatcher {
    Native(RecommendedWatcher),
    Polling(PollWatcher),
}

/// Running observer. Dropping it also stops the watch, but blocks the
/// current thread while notify joins its worker; prefer [`ObserverHandle::stop`].
pub struct ObserverHandle {
    root: PathBuf,
    watcher: Option<ActiveWatcher>,
    dispatch: JoinHandle<()>,
    scan: Option<JoinHandle<()>>,
    errors: Arc<AtomicU64>,
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.watcher {
            Some(ActiveWatcher::Native(_)) => "native",
            Some(ActiveWatcher::Polling(_)) => "polling",
            None => "stopped",
        };
        f.debug_struct("ObserverHandle")
            .field("root", &self.root)
            .field("mode", &mode)
            .field("dispatch_finished", &self.dispatch.is_finished())
            .field("errors", &self.error_count())
            .finish()
    }
}

impl ObserverHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Watcher errors seen so far. Errors are logged and never stop the loop.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub async fn stop(mut self) {
        if let Some(watcher) = self.watcher.take()
            && let Err(err) = spawn_blocking(move || drop(watcher)).await
        {
            warn!("dropping file watcher failed: {err}");
        }
        if let Some(scan) = self.scan.take() {
            scan.abort();
        }
        self.dispatch.abort();
        info!(root = %self.root.display(), "stopped watching upload root");
    }
}

enum WatchMessage {
    Event(Event),
    Error(String),
}

impl fmt::Debug for WatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMessage::Event(event) => f
                .debug_struct("WatchMessage::Event")
                .field("kind", &event.kind)
                .field("path_count", &event.paths.len())
                .finish(),
            WatchMessage::Error(message) => f
                .debug_struct("WatchMessage::Error")
                .field("message", message)
                .finish(),
        }
    }
}

fn init_watcher(
    root: &Path,
    use_polling: bool,
    poll_interval: std::time::Duration,
    tx: mpsc::Sender<WatchMessage>,
) -> Result<ActiveWatcher> {
    let log_root = root.to_path_buf();
    let handler = move |res: std::result::Result<Event, notify::Error>| match res {
        Ok(event) => {
            if let Err(err) = tx.blocking_send(WatchMessage::Event(event)) {
                debug!(
                    "watch channel send failed for {}: {}",
                    log_root.display(),
                    err
                );
            }
        }
        Err(err) => {
            let _ = tx.blocking_send(WatchMessage::Error(err.to_string()));
        }
    };

    let mut watcher = if use_polling {
        let config = NotifyConfig::default().with_poll_interval(poll_interval);
        ActiveWatcher::Polling(PollWatcher::new(handler, config).map_err(|err| {
            IngestError::Watch(format!(
                "failed to create poll watcher for {}: {err}",
                root.display()
            ))
        })?)
    } else {
        ActiveWatcher::Native(RecommendedWatcher::new(handler, NotifyConfig::default()).map_err(
            |err| {
                IngestError::Watch(format!(
                    "failed to create watcher for {}: {err}",
                    root.display()
                ))
            },
        )?)
    };

    let watched = match &mut watcher {
        ActiveWatcher::Native(inner) => inner.watch(root, RecursiveMode::Recursive),
        ActiveWatcher::Polling(inner) => inner.watch(root, RecursiveMode::Recursive),
    };
    watched.map_err(|err| {
        IngestError::Watch(format!("failed to watch {}: {err}", root.display()))
    })?;

    Ok(watcher)
}

/// The configured root plus its canonical form, which is what some
/// platforms report in events.
async fn resolve_roots(root: &Path) -> Vec<PathBuf> {
    let mut roots = vec![root.to_path_buf()];
    if let Ok(canonical) = tokio::fs::canonicalize(root).await
        && canonical != root
    {
        roots.push(canonical);
    }
    roots
}

/// Whether an event kind can mean "a file now has new content".
///
/// The poll watcher reports a newer mtime as a write-time metadata change
/// rather than a data change, so polling mode accepts that too.
fn is_relevant(kind: &EventKind, polling: bool) -> bool {
    match kind {
        EventKind::Create(CreateKind::File | CreateKind::Any)
        | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => true,
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)) => polling,
        _ => false,
    }
}

/// Paths in `event` worth scheduling. Renames reporting both ends only
/// contribute the destination.
fn candidate_paths(event: Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.into_iter().last().into_iter().collect()
        }
        _ => event.paths,
    }
}

fn within_camera_folder(roots: &[PathBuf], path: &Path) -> bool {
    roots.iter().any(|root| camera_folder(root, path).is_some())
}

fn spawn_dispatch_loop(
    mut rx: mpsc::Receiver<WatchMessage>,
    roots: Vec<PathBuf>,
    scheduler: DebounceScheduler,
    errors: Arc<AtomicU64>,
    polling: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                WatchMessage::Event(event) => {
                    if !is_relevant(&event.kind, polling) {
                        continue;
                    }
                    let detected_at = Utc::now();
                    for path in candidate_paths(event) {
                        if !within_camera_folder(&roots, &path) {
                            debug!(path = %path.display(), "ignoring event outside camera folders");
                            continue;
                        }
                        match tokio::fs::metadata(&path).await {
                            Ok(meta) if meta.is_file() => {
                                scheduler.schedule(FileEvent { path, detected_at });
                            }
                            Ok(_) => {}
                            Err(err) => {
                                debug!(path = %path.display(), "ignoring vanished path: {err}");
                            }
                        }
                    }
                }
                WatchMessage::Error(message) => {
                    errors.fetch_add(1, Ordering::Relaxed);
                    warn!("file watcher error: {message}");
                }
            }
        }
        debug!("watch channel closed, dispatch loop exiting");
    })
}

fn spawn_existing_scan(roots: Vec<PathBuf>, scheduler: DebounceScheduler) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(root) = roots.first().cloned() else {
            return;
        };
        let listing = spawn_blocking(move || collect_files(&root)).await;
        let files = match listing {
            Ok(files) => files,
            Err(err) => {
                warn!("scan of existing uploads failed: {err}");
                return;
            }
        };

        let mut scheduled = 0usize;
        for path in files {
            if within_camera_folder(&roots, &path) && scheduler.schedule(FileEvent::new(path)) {
                scheduled += 1;
            }
        }
        info!(scheduled, "scheduled uploads present at startup");
    })
}

fn collect_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), "cannot read directory: {err}");
                continue;
            }
        };
        for entry in entries.flatten() {
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => stack.push(entry.path()),
                Ok(kind) if kind.is_file() => files.push(entry.path()),
                _ => {}
            }
        }
    }
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use notify::event::{AccessKind, DataChange, RemoveKind};
    use parking_lot::Mutex;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use super::*;

    #[derive(Default)]
    struct Seen(Mutex<Vec<PathBuf>>);

    #[async_trait]
    impl PathProcessor for Seen {
        async fn process(&self, event: FileEvent, _cancel: CancellationToken) {
            self.0.lock().push(event.path);
        }
    }

    fn observer(root: PathBuf, seen: Arc<Seen>, tweak: impl FnOnce(&mut WatchConfig)) -> DirectoryObserver {
        let mut config = WatchConfig {
            root,
            debounce_ms: 20,
            poll_interval_ms: 50,
            ..WatchConfig::default()
        };
        tweak(&mut config);
        let scheduler = DebounceScheduler::new(config.debounce(), seen);
        DirectoryObserver::new(config, scheduler)
    }

    async fn wait_for(seen: &Seen, predicate: impl Fn(&[PathBuf]) -> bool) -> bool {
        for _ in 0..100 {
            if predicate(seen.0.lock().as_slice()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[test]
    fn start_outside_runtime_is_rejected() {
        let dir = tempdir().unwrap();
        let observer = observer(dir.path().to_path_buf(), Arc::default(), |_| {});
        let result = futures::executor::block_on(observer.start());
        assert!(matches!(result, Err(IngestError::NoRuntime)));
    }

    #[test]
    fn classifies_event_kinds() {
        for polling in [false, true] {
            assert!(is_relevant(&EventKind::Create(CreateKind::File), polling));
            assert!(is_relevant(&EventKind::Create(CreateKind::Any), polling));
            assert!(is_relevant(
                &EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                polling
            ));
            assert!(is_relevant(&EventKind::Modify(ModifyKind::Any), polling));
            assert!(is_relevant(&EventKind::Modify(ModifyKind::Name(RenameMode::To)), polling));
            assert!(is_relevant(&EventKind::Modify(ModifyKind::Name(RenameMode::Both)), polling));

            assert!(!is_relevant(&EventKind::Create(CreateKind::Folder), polling));
            assert!(!is_relevant(&EventKind::Modify(ModifyKind::Name(RenameMode::From)), polling));
            assert!(!is_relevant(
                &EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                polling
            ));
            assert!(!is_relevant(&EventKind::Remove(RemoveKind::File), polling));
            assert!(!is_relevant(&EventKind::Access(AccessKind::Any), polling));
            assert!(!is_relevant(&EventKind::Other, polling));
        }
    }

    #[test]
    fn write_time_changes_count_only_when_polling() {
        let kind = EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime));
        assert!(is_relevant(&kind, true));
        assert!(!is_relevant(&kind, false));
    }

    #[test]
    fn rename_contributes_destination_only() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/up/cam/.upload.tmp"))
            .add_path(PathBuf::from("/up/cam/final.jpg"));
        assert_eq!(candidate_paths(event), vec![PathBuf::from("/up/cam/final.jpg")]);
    }

    #[test]
    fn only_files_inside_camera_folders_qualify() {
        let roots = vec![PathBuf::from("/up")];
        assert!(within_camera_folder(&roots, Path::new("/up/cam/a.jpg")));
        assert!(!within_camera_folder(&roots, Path::new("/up/a.jpg")));
        assert!(!within_camera_folder(&roots, Path::new("/other/cam/a.jpg")));
    }

    #[tokio::test]
    async fn creates_missing_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("uploads");
        let handle = observer(root.clone(), Arc::default(), |_| {})
            .start()
            .await
            .unwrap();
        assert!(root.is_dir());
        assert_eq!(handle.root(), root);
        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn schedules_existing_uploads_on_start() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("Front Door")).unwrap();
        std::fs::write(root.join("Front Door/old.jpg"), b"jpeg").unwrap();
        std::fs::write(root.join("loose.jpg"), b"jpeg").unwrap();

        let seen = Arc::new(Seen::default());
        let handle = observer(root.clone(), seen.clone(), |cfg| cfg.scan_existing_on_start = true)
            .start()
            .await
            .unwrap();

        assert!(wait_for(&seen, |paths| paths.iter().any(|p| p.ends_with("old.jpg"))).await);
        assert!(!seen.0.lock().iter().any(|p| p.ends_with("loose.jpg")));
        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn polling_watcher_picks_up_new_uploads() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("Garage")).unwrap();

        let seen = Arc::new(Seen::default());
        let handle = observer(root.clone(), seen.clone(), |cfg| cfg.use_polling = true)
            .start()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(root.join("Garage/new.jpg"), b"jpeg").unwrap();

        assert!(wait_for(&seen, |paths| paths.iter().any(|p| p.ends_with("new.jpg"))).await);
        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn polling_watcher_picks_up_overwritten_uploads() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("Garage")).unwrap();

        let seen = Arc::new(Seen::default());
        let handle = observer(root.clone(), seen.clone(), |cfg| cfg.use_polling = true)
            .start()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let snapshot = root.join("Garage/snap.jpg");
        std::fs::write(&snapshot, b"first frame").unwrap();
        assert!(wait_for(&seen, |paths| !paths.is_empty()).await);

        // Coarse mtime filesystems need a full second to register a new write.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let after_create = seen.0.lock().len();
        std::fs::write(&snapshot, b"second frame, somewhat longer").unwrap();

        assert!(wait_for(&seen, |paths| paths.len() > after_create).await);
        assert!(seen.0.lock().iter().all(|p| p.ends_with("snap.jpg")));
        handle.stop().await;
    }
}
