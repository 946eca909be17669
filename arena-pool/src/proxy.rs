//! Single-task proxy: one engine, many overlapping decision requests
//!
//! Level 1 - Orchestration
//!
//! The proxy owns whichever backend is current behind a lock. Normal
//! requests take a read lock; crash recovery swaps the backend under the
//! write lock. Requests issued after the supervisor holds the write lock wait
//! for the swap. A request that slips in between the crash and the lock still
//! reaches the old link and is rejected with `WorkerCrashed` or `Terminated`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arena_core::{Decision, Difficulty, EngineConfig, EngineFactory, Player};
use tokio::sync::{oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendKind, ComputeBackend, InlineBackend};
use crate::config::ProxyConfig;
use crate::error::{Result, WorkerError};
use crate::link::WorkerLink;
use crate::protocol::{ActionRequest, TaskId, WorkerId};

struct ProxyShared {
    backend: RwLock<Arc<dyn ComputeBackend>>,
    factory: Arc<dyn EngineFactory>,
    settings: ProxyConfig,
    /// Live engine configuration, including runtime changes
    engine_config: Mutex<EngineConfig>,
    degraded: watch::Sender<bool>,
    terminated: AtomicBool,
}

impl ProxyShared {
    fn current_config(&self) -> EngineConfig {
        self.engine_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn inline_backend(&self) -> Result<Arc<dyn ComputeBackend>> {
        start_inline(&self.factory, &self.current_config(), self.settings.request_timeout)
    }
}

/// In-process engine under the same request deadline as a worker
fn start_inline(
    factory: &Arc<dyn EngineFactory>,
    engine: &EngineConfig,
    request_timeout: Duration,
) -> Result<Arc<dyn ComputeBackend>> {
    let inline = InlineBackend::new(Arc::clone(factory), engine)?.with_request_timeout(request_timeout);
    Ok(Arc::new(inline))
}

/// Asynchronous front for one engine
pub struct AiProxy {
    shared: Arc<ProxyShared>,
    next_id: AtomicU64,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl AiProxy {
    /// Create the engine and wait until it is ready
    ///
    /// Falls back to the inline engine when workers are disabled or a worker
    /// thread cannot be spawned. Init errors and init timeouts are returned.
    pub async fn initialize(factory: Arc<dyn EngineFactory>, config: ProxyConfig) -> Result<Self> {
        if config.request_timeout <= config.engine.time_limit {
            warn!(
                "Request timeout {:?} does not exceed the engine time limit {:?}",
                config.request_timeout, config.engine.time_limit
            );
        }

        let (degraded_tx, _) = watch::channel(false);
        let mut crash_rx = None;
        let backend: Arc<dyn ComputeBackend> = if config.use_workers {
            match WorkerLink::start(Arc::clone(&factory), &config, 0).await {
                Ok((link, crashed)) => {
                    crash_rx = Some(crashed);
                    Arc::new(link)
                }
                Err(WorkerError::Spawn(reason)) => {
                    warn!("Worker thread unavailable ({}); running inline", reason);
                    degraded_tx.send_replace(true);
                    start_inline(&factory, &config.engine, config.request_timeout)?
                }
                Err(e) => return Err(e),
            }
        } else {
            start_inline(&factory, &config.engine, config.request_timeout)?
        };
        info!("AI proxy ready ({})", backend.kind());

        let shared = Arc::new(ProxyShared {
            backend: RwLock::new(backend),
            factory,
            engine_config: Mutex::new(config.engine.clone()),
            settings: config,
            degraded: degraded_tx,
            terminated: AtomicBool::new(false),
        });
        let supervisor = crash_rx.map(|crashed| tokio::spawn(supervise(Arc::clone(&shared), crashed)));

        Ok(Self {
            shared,
            next_id: AtomicU64::new(1),
            supervisor: Mutex::new(supervisor),
        })
    }

    /// Ask the engine for `player`'s next action in a serialized state
    pub async fn request_action(&self, state: &str, player: Player) -> Result<Decision> {
        if self.shared.terminated.load(Ordering::Acquire) {
            return Err(WorkerError::Terminated);
        }
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let backend = Arc::clone(&*self.shared.backend.read().await);
        debug!("Request {} for {:?} via {}", id, player, backend.kind());

        backend
            .submit_one(ActionRequest {
                id,
                state: state.to_string(),
                player,
            })
            .await
    }

    pub async fn set_difficulty(&self, difficulty: Difficulty) {
        self.reconfigure(|config| config.difficulty = difficulty).await;
    }

    pub async fn set_time_limit(&self, time_limit: Duration) {
        self.reconfigure(|config| config.time_limit = time_limit).await;
    }

    pub async fn set_debug_mode(&self, debug: bool) {
        self.reconfigure(|config| config.debug = debug).await;
    }

    /// Update the local configuration and forward it; applies to the next request
    async fn reconfigure(&self, change: impl FnOnce(&mut EngineConfig)) {
        let update = {
            let mut config = self
                .shared
                .engine_config
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            change(&mut config);
            config.update()
        };
        self.shared.backend.read().await.update_config(&update);
    }

    /// Release the engine; pending requests resolve with `Terminated`
    pub async fn terminate(&self) {
        if self.shared.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(supervisor) = supervisor {
            supervisor.abort();
        }
        self.shared.backend.read().await.shutdown();
        info!("AI proxy terminated");
    }

    /// Where requests currently run
    pub async fn mode(&self) -> BackendKind {
        self.shared.backend.read().await.kind()
    }

    /// Flips to `true` when the proxy falls back to the inline engine
    pub fn subscribe_degraded(&self) -> watch::Receiver<bool> {
        self.shared.degraded.subscribe()
    }

    pub fn is_degraded(&self) -> bool {
        *self.shared.degraded.borrow()
    }

    /// Requests sent but not yet resolved
    pub async fn pending_count(&self) -> usize {
        self.shared.backend.read().await.pending_count()
    }

    /// Current engine configuration, including runtime changes
    pub fn config(&self) -> EngineConfig {
        self.shared.current_config()
    }
}

impl Drop for AiProxy {
    fn drop(&mut self) {
        if let Some(supervisor) = self
            .supervisor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            supervisor.abort();
        }
    }
}

/// Wait for worker crashes and restore service after each one
///
/// One re-initialization is attempted per crash; if it fails the proxy
/// switches to the inline engine for good.
async fn supervise(shared: Arc<ProxyShared>, mut crashed: oneshot::Receiver<WorkerId>) {
    loop {
        // The sender is dropped when the link shuts down without crashing
        let Ok(worker) = (&mut crashed).await else {
            return;
        };
        let mut backend = shared.backend.write().await;
        if shared.terminated.load(Ordering::Acquire) {
            return;
        }
        warn!("Worker {} crashed; re-initializing", worker);

        let mut settings = shared.settings.clone();
        settings.engine = shared.current_config();
        match WorkerLink::start(Arc::clone(&shared.factory), &settings, worker.generation + 1).await
        {
            Ok((link, next)) => {
                info!("Worker {} replaced", link.worker_id());
                backend.shutdown();
                *backend = Arc::new(link);
                crashed = next;
            }
            Err(e) => {
                warn!("Re-initialization failed ({}); falling back to inline engine", e);
                match shared.inline_backend() {
                    Ok(inline) => {
                        backend.shutdown();
                        *backend = inline;
                    }
                    Err(e) => error!("Inline engine unavailable: {}", e),
                }
                shared.degraded.send_replace(true);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_core::{CoinEngineFactory, CoinLine};

    #[tokio::test]
    async fn test_proxy_answers_with_isolated_worker() {
        let proxy = AiProxy::initialize(Arc::new(CoinEngineFactory), ProxyConfig::default())
            .await
            .unwrap();
        assert_eq!(proxy.mode().await, BackendKind::Isolated);
        assert!(!proxy.is_degraded());

        let state = CoinLine::generate(21, 10, Player::One).to_json();
        let decision = proxy.request_action(&state, Player::One).await.unwrap();
        assert!(decision.side().is_ok());
        assert_eq!(proxy.pending_count().await, 0);
        proxy.terminate().await;
    }

    #[tokio::test]
    async fn test_proxy_inline_mode() {
        let config = ProxyConfig::default().inline();
        let proxy = AiProxy::initialize(Arc::new(CoinEngineFactory), config)
            .await
            .unwrap();
        assert_eq!(proxy.mode().await, BackendKind::Inline);

        let state = CoinLine::generate(22, 10, Player::One).to_json();
        assert!(proxy.request_action(&state, Player::One).await.is_ok());
    }

    #[tokio::test]
    async fn test_setters_update_local_config() {
        let proxy = AiProxy::initialize(Arc::new(CoinEngineFactory), ProxyConfig::default())
            .await
            .unwrap();
        proxy.set_difficulty(Difficulty::Hard).await;
        proxy.set_time_limit(Duration::from_millis(500)).await;
        proxy.set_debug_mode(true).await;

        let config = proxy.config();
        assert_eq!(config.difficulty, Difficulty::Hard);
        assert_eq!(config.time_limit, Duration::from_millis(500));
        assert!(config.debug);

        let state = CoinLine::generate(23, 10, Player::One).to_json();
        let decision = proxy.request_action(&state, Player::One).await.unwrap();
        assert!(decision.diagnostics.is_some());
    }

    #[tokio::test]
    async fn test_requests_after_terminate_are_rejected() {
        let proxy = AiProxy::initialize(Arc::new(CoinEngineFactory), ProxyConfig::default())
            .await
            .unwrap();
        proxy.terminate().await;
        let state = CoinLine::generate(24, 10, Player::One).to_json();
        assert_eq!(
            proxy.request_action(&state, Player::One).await.unwrap_err(),
            WorkerError::Terminated
        );
    }
}
