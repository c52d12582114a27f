//! REST API server lifecycle management: start/stop/status, independent of
//! the polling orchestrator's own lifecycle so either can run alone.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::rest::{build_router, AppState};

/// Status of the REST API server.
#[derive(Debug, Clone, PartialEq)]
pub enum RestApiStatus {
    Stopped,
    Starting,
    Running { port: u16 },
    Error(String),
}

impl RestApiStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, RestApiStatus::Running { .. })
    }
}

/// REST API server handle for lifecycle management.
pub struct RestApiServer {
    state: AppState,
    port: u16,
    status: Arc<Mutex<RestApiStatus>>,
    shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    #[allow(dead_code)]
    task_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RestApiServer {
    pub fn new(state: AppState, port: u16) -> Self {
        Self {
            state,
            port,
            status: Arc::new(Mutex::new(RestApiStatus::Stopped)),
            shutdown_tx: Arc::new(Mutex::new(None)),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn status(&self) -> RestApiStatus {
        self.status.lock().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn start(&self) -> Result<(), String> {
        if self.is_running() {
            return Err(format!("REST API already running on port {}", self.port));
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock().unwrap() = Some(shutdown_tx);

        let router = build_router(self.state.clone());
        let port = self.port;
        let status = self.status.clone();

        *status.lock().unwrap() = RestApiStatus::Starting;

        let handle = tokio::spawn(async move {
            let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    *status.lock().unwrap() = RestApiStatus::Running { port };
                    tracing::info!("REST API listening on http://{}", addr);

                    let _ = axum::serve(listener, router)
                        .with_graceful_shutdown(async {
                            let _ = shutdown_rx.await;
                        })
                        .await;
                }
                Err(e) => {
                    *status.lock().unwrap() = RestApiStatus::Error(e.to_string());
                    tracing::error!("failed to start REST API: {}", e);
                    return;
                }
            }

            *status.lock().unwrap() = RestApiStatus::Stopped;
        });

        *self.task_handle.lock().unwrap() = Some(handle);

        Ok(())
    }

    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        *self.status.lock().unwrap() = RestApiStatus::Stopped;
        tracing::info!("REST API server stopped");
    }
}

impl Drop for RestApiServer {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::Config;
    use crate::dedup::Deduplicator;
    use crate::metrics::MetricsRecorder;
    use crate::ratelimit::RateLimitGovernor;

    fn state() -> AppState {
        let config = Config::default();
        AppState::new(
            config.clone(),
            Arc::new(MetricsRecorder::new()),
            Arc::new(RateLimitGovernor::new(&config.rate)),
            Arc::new(Cache::new(&config.cache)),
            Arc::new(Deduplicator::default()),
        )
    }

    #[test]
    fn initial_status_is_stopped() {
        let server = RestApiServer::new(state(), 18080);
        assert_eq!(server.status(), RestApiStatus::Stopped);
        assert!(!server.is_running());
    }

    #[test]
    fn reports_configured_port() {
        let server = RestApiServer::new(state(), 18081);
        assert_eq!(server.port(), 18081);
    }

    #[test]
    fn double_start_is_an_error() {
        let server = RestApiServer::new(state(), 18082);
        *server.status.lock().unwrap() = RestApiStatus::Running { port: 18082 };
        let result = server.start();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("already running"));
    }

    #[test]
    fn stop_clears_shutdown_channel() {
        let server = RestApiServer::new(state(), 18083);
        let (tx, _rx) = oneshot::channel();
        *server.shutdown_tx.lock().unwrap() = Some(tx);
        *server.status.lock().unwrap() = RestApiStatus::Running { port: 18083 };

        server.stop();

        assert_eq!(server.status(), RestApiStatus::Stopped);
        assert!(server.shutdown_tx.lock().unwrap().is_none());
    }
}
