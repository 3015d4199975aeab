//! Local HTTP listener shared by the HTTP-speaking doubles.

use crate::result::{HarnessError, HarnessResult};
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// An axum router served on an ephemeral loopback port
#[derive(Debug)]
pub struct DoubleServer {
    name: String,
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DoubleServer {
    /// Bind `127.0.0.1:0` and start serving `router`
    pub async fn start(name: impl Into<String>, router: Router) -> HarnessResult<Self> {
        let name = name.into();
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();

        let label = name.clone();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await;
            if let Err(e) = served {
                tracing::warn!(double = %label, error = %e, "double server stopped with error");
            }
        });

        tracing::info!(double = %name, %addr, "double listening");
        Ok(Self {
            name,
            addr,
            shutdown: Some(tx),
            task: Some(task),
        })
    }

    /// Bound address
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:<port>`
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Absolute URL for `path` on this server
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        crate::config::join_url(&self.base_url(), path)
    }

    /// Whether the listener is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop accepting connections and wait for in-flight requests
    pub async fn stop(&mut self) -> HarnessResult<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| HarnessError::double(&self.name, format!("server task failed: {e}")))?;
            tracing::info!(double = %self.name, "double stopped");
        }
        Ok(())
    }
}

impl Drop for DoubleServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
