//! Shutdown coordinator
//!
//! Keeps weak handles to every registered SAM control socket and writes a
//! final `QUIT` to each on demand. The writes are fire-and-forget: they
//! bypass the session state machines entirely, so this path is safe to
//! call from an application shutdown handler even while sessions are mid
//! operation.

use std::sync::Weak;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::debug;

/// Registry of control sockets to be told `QUIT` on application shutdown.
#[derive(Default)]
pub struct ShutdownCoordinator {
    writers: Mutex<Vec<Weak<Mutex<OwnedWriteHalf>>>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn register(&self, writer: Weak<Mutex<OwnedWriteHalf>>) {
        self.writers.lock().await.push(writer);
    }

    /// Write `QUIT` to every still-live control socket. Errors are
    /// ignored; the sockets are about to go away anyway.
    pub async fn shutdown_all(&self) {
        let writers = std::mem::take(&mut *self.writers.lock().await);
        for weak in writers {
            let Some(writer) = weak.upgrade() else {
                continue;
            };
            let mut writer = writer.lock().await;
            if writer.write_all(b"QUIT\n").await.is_err() {
                debug!("control socket already gone during shutdown");
            }
            let _ = writer.flush().await;
        }
    }

    /// Number of currently registered sockets (dead entries included
    /// until the next `shutdown_all`).
    pub async fn registered(&self) -> usize {
        self.writers.lock().await.len()
    }
}
