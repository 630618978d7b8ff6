//! Single-flight credential refresh.

use crate::credentials::CredentialProvider;
use crate::error::{ApiError, Result};
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type SharedRefresh = Shared<BoxFuture<'static, Result<()>>>;

#[derive(Default)]
struct RefreshState {
    next_generation: u64,
    in_flight: Option<(u64, SharedRefresh)>,
}

/// Ensures at most one token refresh runs per provider.
///
/// Callers that need a token while a refresh is running wait on that
/// refresh instead of starting their own. The refresh runs on its own task,
/// so a caller giving up does not cancel it for the others.
pub struct CredentialRefreshCoordinator {
    provider: Arc<dyn CredentialProvider>,
    state: Arc<Mutex<RefreshState>>,
    refreshes_started: Arc<AtomicU64>,
}

impl CredentialRefreshCoordinator {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            state: Arc::new(Mutex::new(RefreshState::default())),
            refreshes_started: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Return a usable access token, refreshing first if there is none.
    pub async fn ensure_token(&self) -> Result<String> {
        if let Some(token) = self.provider.access_token() {
            return Ok(token);
        }

        self.join_refresh().await?;

        // A successful refresh that still left no token is an auth failure
        self.provider.access_token().ok_or(ApiError::Unauthorized)
    }

    /// Drop a token the server rejected, so the next `ensure_token` refreshes.
    pub fn invalidate(&self, rejected: &str) {
        self.provider.invalidate_access_token(rejected);
    }

    /// Whether a refresh is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.state().in_flight.is_some()
    }

    /// Number of refreshes started since creation.
    pub fn refreshes_started(&self) -> u64 {
        self.refreshes_started.load(Ordering::SeqCst)
    }

    fn join_refresh(&self) -> SharedRefresh {
        let (sender, receiver) = oneshot::channel();

        let (generation, refresh) = {
            let mut state = self.state();

            if let Some((_, refresh)) = &state.in_flight {
                debug!("Waiting on in-flight token refresh");
                return refresh.clone();
            }

            // A refresh may have finished between the fast path and taking the lock
            if self.provider.access_token().is_some() {
                return future::ready(Ok(())).boxed().shared();
            }

            let generation = state.next_generation;
            state.next_generation = state.next_generation.wrapping_add(1);
            self.refreshes_started.fetch_add(1, Ordering::SeqCst);

            let refresh = async move {
                receiver.await.unwrap_or_else(|_| {
                    Err(ApiError::Aborted("token refresh ended without a result".into()))
                })
            }
            .boxed()
            .shared();

            state.in_flight = Some((generation, refresh.clone()));
            (generation, refresh)
        };

        let guard = RefreshGuard {
            state: Arc::clone(&self.state),
            generation,
            sender: Some(sender),
        };

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "No runtime to refresh the access token on");
                drop(guard);
                return refresh;
            }
        };

        debug!("Starting token refresh");
        let provider = Arc::clone(&self.provider);
        runtime.spawn(async move {
            let result = provider.refresh_access_token().await;
            match &result {
                Ok(()) => info!("Access token refreshed"),
                Err(e) => warn!(error = %e, "Access token refresh failed"),
            }
            guard.complete(result);
        });

        refresh
    }

    fn state(&self) -> MutexGuard<'_, RefreshState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-flight refresh once it ends, however it ends.
///
/// Waiters are only woken after the state is cleared.
struct RefreshGuard {
    state: Arc<Mutex<RefreshState>>,
    generation: u64,
    sender: Option<oneshot::Sender<Result<()>>>,
}

impl RefreshGuard {
    fn complete(mut self, result: Result<()>) {
        self.release();
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(result);
        }
    }

    fn release(&self) {
        let mut state = lock_state(&self.state);
        if matches!(&state.in_flight, Some((generation, _)) if *generation == self.generation) {
            state.in_flight = None;
        }
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.release();
    }
}
