use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long a removed socket may take to reappear before the watcher
/// gives up waiting (daemon failover completes well within this).
const SOCKET_RESTORE_TIMEOUT: Duration = Duration::from_secs(10);
const SOCKET_RESTORE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Watch the switch daemon's database UNIX socket.
///
/// On removal, wait for the socket to be recreated, re-arm the watch
/// and emit exactly one recovery event. Creations are only logged;
/// the OpenFlow sessions reconnect through their own supervisors.
pub fn spawn_socket_watcher(
    socket_path: PathBuf,
    recovery_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (notify_tx, mut notify_rx) = mpsc::channel::<EventKind>(16);

        let mut watcher = match notify::recommended_watcher(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let _ = notify_tx.blocking_send(event.kind);
                }
                Err(err) => {
                    warn!(error = %err, "socket watcher backend error");
                }
            },
        ) {
            Ok(watcher) => watcher,
            Err(err) => {
                error!(error = %err, "failed to create socket watcher");
                return;
            }
        };

        if let Err(err) = watcher.watch(&socket_path, RecursiveMode::NonRecursive) {
            error!(path = %socket_path.display(), error = %err, "failed to watch db socket");
            return;
        }
        info!(path = %socket_path.display(), "watching switch db socket");

        loop {
            let kind = tokio::select! {
                () = cancel.cancelled() => break,
                kind = notify_rx.recv() => match kind {
                    Some(kind) => kind,
                    None => break,
                },
            };

            match kind {
                EventKind::Remove(_) => {
                    info!(path = %socket_path.display(), "db socket removed, waiting for recovery");

                    if !wait_until_recreated(&socket_path, &cancel).await {
                        warn!(path = %socket_path.display(), "timed out waiting for db socket restore");
                    }
                    if cancel.is_cancelled() {
                        break;
                    }

                    rearm_watch(&mut watcher, &socket_path, &cancel).await;
                    if cancel.is_cancelled() {
                        break;
                    }

                    if recovery_tx.send(()).await.is_err() {
                        break;
                    }
                }
                EventKind::Create(_) => {
                    info!(path = %socket_path.display(), "db socket created");
                }
                _ => {}
            }
        }

        info!(path = %socket_path.display(), "socket watcher stopped");
    })
}

/// Poll for the socket to reappear. Returns `false` on timeout.
async fn wait_until_recreated(path: &Path, cancel: &CancellationToken) -> bool {
    let deadline = tokio::time::Instant::now() + SOCKET_RESTORE_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        tokio::select! {
            () = cancel.cancelled() => return false,
            () = tokio::time::sleep(SOCKET_RESTORE_POLL_INTERVAL) => {}
        }
    }
    path.exists()
}

/// The watch on the removed inode is gone; keep retrying until the new
/// socket can be watched.
async fn rearm_watch<W: Watcher>(watcher: &mut W, path: &Path, cancel: &CancellationToken) {
    loop {
        match watcher.watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => return,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "re-arming db socket watch failed, retrying");
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }
}
