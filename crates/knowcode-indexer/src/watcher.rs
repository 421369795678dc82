use crate::engine::Engine;
use crate::error::{IndexerError, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Debounce settings for the filesystem watcher.
#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    /// Quiet period that closes a batch
    pub debounce: Duration,
    /// Upper bound on how long a busy burst can delay a batch
    pub max_batch_wait: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            max_batch_wait: Duration::from_secs(3),
        }
    }
}

enum WatcherCommand {
    Shutdown,
}

/// Watches the analyzed root and drives incremental re-indexing through
/// [`Engine::reindex_paths`].
///
/// Events are coalesced inside a debounce window so editor save bursts
/// become one batch. Re-indexing happens on a background task; queries
/// are never blocked beyond the per-sub-index swap locks. On stop the
/// pending queue is drained before the task exits.
pub struct FileWatcher {
    command_tx: mpsc::Sender<WatcherCommand>,
    handle: tokio::task::JoinHandle<()>,
    // kept alive for the lifetime of the watch
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    pub fn start(engine: Arc<Engine>, config: WatcherConfig) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel::<PathBuf>(1024);
        let (command_tx, command_rx) = mpsc::channel::<WatcherCommand>(4);

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let Ok(event) = result else {
                return;
            };
            for path in event.paths {
                // a full queue only drops duplicates of an ongoing burst
                let _ = event_tx.try_send(path);
            }
        })
        .map_err(|e| IndexerError::WatcherError(e.to_string()))?;
        watcher
            .watch(engine.root(), RecursiveMode::Recursive)
            .map_err(|e| IndexerError::WatcherError(e.to_string()))?;
        log::info!("Watching {} for changes", engine.root().display());

        let handle = tokio::spawn(run_loop(engine, config, event_rx, command_rx));
        Ok(Self {
            command_tx,
            handle,
            _watcher: watcher,
        })
    }

    /// Signal shutdown and wait for the worker to drain its queue.
    pub async fn stop(self) {
        let _ = self.command_tx.send(WatcherCommand::Shutdown).await;
        let _ = self.handle.await;
    }
}

async fn run_loop(
    engine: Arc<Engine>,
    config: WatcherConfig,
    mut event_rx: mpsc::Receiver<PathBuf>,
    mut command_rx: mpsc::Receiver<WatcherCommand>,
) {
    loop {
        tokio::select! {
            command = command_rx.recv() => {
                match command {
                    Some(WatcherCommand::Shutdown) | None => {
                        // drain whatever is still queued, then exit
                        let mut pending = HashSet::new();
                        while let Ok(path) = event_rx.try_recv() {
                            pending.insert(path);
                        }
                        flush(&engine, pending).await;
                        log::info!("Watcher stopped");
                        return;
                    }
                }
            }
            event = event_rx.recv() => {
                let Some(first) = event else { return };
                let mut pending = HashSet::from([first]);
                let batch_deadline = Instant::now() + config.max_batch_wait;

                // coalesce: keep absorbing events until a quiet period or
                // the batch deadline
                loop {
                    let quiet = tokio::time::timeout(config.debounce, event_rx.recv()).await;
                    match quiet {
                        Ok(Some(path)) => {
                            pending.insert(path);
                            if Instant::now() >= batch_deadline {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(_) => break, // debounce window passed quietly
                    }
                }
                flush(&engine, pending).await;
            }
        }
    }
}

async fn flush(engine: &Arc<Engine>, pending: HashSet<PathBuf>) {
    if pending.is_empty() {
        return;
    }
    let batch: Vec<PathBuf> = pending.into_iter().collect();
    match engine.reindex_paths(batch).await {
        Ok(stats) if stats.files > 0 => {
            log::info!(
                "Incremental update: {} files, +{} -{} chunks",
                stats.files,
                stats.chunks_added,
                stats.chunks_removed
            );
        }
        Ok(_) => {}
        Err(e) => log::error!("Incremental update failed: {e}"),
    }
}
