//! Bearer-token attachment and single-flight token refresh.
//!
//! Every request passing through [`TokenRefreshCoordinator`] gets the current access
//! token attached. A 401 on a request that has not been replayed yet either starts a
//! refresh cycle or joins the one already running; when the cycle settles every
//! request tied to it is released together, with the new token or with the refresh
//! error. The refresh itself runs on a spawned task so that a caller dropping its
//! future cannot strand the other requests queued behind it. Resetting the
//! coordinator aborts that task, so a cycle torn down mid-flight never persists or
//! reports anything afterwards.

use super::{Dispatcher, HttpError, HttpResponse, RefreshError, RequestDescriptor};
use crate::redact::redact_secrets;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const REFRESH_PATH: &str = "/auth/refresh";

/// Capabilities the session layer hands to the coordinator.
#[async_trait]
pub trait RefreshHooks: Send + Sync {
    /// Current access token. Absent, never an error, when there is none.
    async fn get_access_token(&self) -> Option<String>;

    /// Exchanges the refresh token for a new pair, persists it, and returns the new
    /// access token.
    async fn refresh_tokens(&self) -> Result<String, RefreshError>;

    /// Called once per failed refresh cycle.
    fn on_refresh_failed(&self);
}

type RefreshOutcome = Result<String, HttpError>;

struct Waiter {
    respond_to: oneshot::Sender<RefreshOutcome>,
}

impl Waiter {
    fn channel() -> (Self, oneshot::Receiver<RefreshOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { respond_to: tx }, rx)
    }

    fn resolve(self, outcome: RefreshOutcome) {
        // The receiving request may have been dropped by its caller.
        let _ = self.respond_to.send(outcome);
    }
}

enum RefreshState {
    Idle,
    Refreshing {
        cycle: u64,
        initiator: Waiter,
        waiters: Vec<Waiter>,
        task: JoinHandle<()>,
    },
}

struct CycleState {
    state: RefreshState,
    last_cycle: u64,
    ejected: bool,
}

impl CycleState {
    /// Opens a new cycle. `spawn` receives the cycle id and starts the task that will
    /// settle it.
    fn begin(
        &mut self,
        spawn: impl FnOnce(u64) -> JoinHandle<()>,
    ) -> (u64, oneshot::Receiver<RefreshOutcome>) {
        self.last_cycle += 1;
        let cycle = self.last_cycle;
        let (initiator, rx) = Waiter::channel();
        self.state = RefreshState::Refreshing {
            cycle,
            initiator,
            waiters: Vec::new(),
            task: spawn(cycle),
        };
        (cycle, rx)
    }

    /// Queues behind the running cycle, if there is one.
    fn enqueue(&mut self) -> Option<(u64, usize, oneshot::Receiver<RefreshOutcome>)> {
        match &mut self.state {
            RefreshState::Refreshing { cycle, waiters, .. } => {
                let (waiter, rx) = Waiter::channel();
                waiters.push(waiter);
                Some((*cycle, waiters.len(), rx))
            }
            RefreshState::Idle => None,
        }
    }

    /// Returns to `Idle` and hands back everyone tied to `cycle`, waiters in the order
    /// they were queued. `None` when that cycle was already reset.
    fn settle(&mut self, cycle: u64) -> Option<(Waiter, Vec<Waiter>)> {
        match self.state {
            RefreshState::Refreshing { cycle: current, .. } if current == cycle => {}
            _ => return None,
        }
        match std::mem::replace(&mut self.state, RefreshState::Idle) {
            RefreshState::Refreshing {
                initiator, waiters, ..
            } => Some((initiator, waiters)),
            RefreshState::Idle => None,
        }
    }

    /// Returns to `Idle`, handing back every pending request (initiator first) and the
    /// task still running the refresh.
    fn clear(&mut self) -> (Vec<Waiter>, Option<JoinHandle<()>>) {
        match std::mem::replace(&mut self.state, RefreshState::Idle) {
            RefreshState::Refreshing {
                initiator,
                mut waiters,
                task,
                ..
            } => {
                waiters.insert(0, initiator);
                (waiters, Some(task))
            }
            RefreshState::Idle => (Vec::new(), None),
        }
    }
}

enum Role {
    Initiator(u64, oneshot::Receiver<RefreshOutcome>),
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

struct Shared {
    hooks: Arc<dyn RefreshHooks>,
    cycles: Mutex<CycleState>,
}

impl Shared {
    async fn refresh(&self, limit: Option<Duration>) -> Result<String, RefreshError> {
        match limit {
            Some(limit) => tokio::time::timeout(limit, self.hooks.refresh_tokens())
                .await
                .unwrap_or(Err(RefreshError::TimedOut(limit))),
            None => self.hooks.refresh_tokens().await,
        }
    }

    async fn run_cycle(self: Arc<Self>, cycle: u64, limit: Option<Duration>) {
        let outcome = self.refresh(limit).await;

        let Some((initiator, waiters)) = self.cycles.lock().await.settle(cycle) else {
            debug!(cycle, "refresh cycle was reset before it settled");
            return;
        };

        match outcome {
            Ok(token) => {
                info!(cycle, waiters = waiters.len(), "token refresh succeeded");
                for waiter in waiters {
                    waiter.resolve(Ok(token.clone()));
                }
                initiator.resolve(Ok(token));
            }
            Err(err) => {
                warn!(
                    cycle,
                    waiters = waiters.len(),
                    error = %redact_secrets(&err.to_string()),
                    "token refresh failed"
                );
                let err = HttpError::Refresh(err);
                for waiter in waiters {
                    waiter.resolve(Err(err.clone()));
                }
                initiator.resolve(Err(err));
                self.hooks.on_refresh_failed();
            }
        }
    }
}

/// Wraps a [`Dispatcher`], attaching bearer tokens and recovering from expired ones.
pub struct TokenRefreshCoordinator {
    dispatcher: Arc<dyn Dispatcher>,
    shared: Arc<Shared>,
    refresh_timeout: Option<Duration>,
}

impl TokenRefreshCoordinator {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, hooks: Arc<dyn RefreshHooks>) -> Self {
        Self {
            dispatcher,
            shared: Arc::new(Shared {
                hooks,
                cycles: Mutex::new(CycleState {
                    state: RefreshState::Idle,
                    last_cycle: 0,
                    ejected: false,
                }),
            }),
            refresh_timeout: None,
        }
    }

    /// Fails the refresh with [`RefreshError::TimedOut`] when it takes longer than `limit`.
    pub fn with_refresh_timeout(mut self, limit: Duration) -> Self {
        self.refresh_timeout = Some(limit);
        self
    }

    pub async fn execute(&self, mut request: RequestDescriptor) -> Result<HttpResponse, HttpError> {
        if self.is_ejected().await {
            return self.dispatcher.dispatch(&request).await;
        }

        if let Some(token) = self
            .shared
            .hooks
            .get_access_token()
            .await
            .filter(|t| !t.is_empty())
        {
            request.bearer(&token);
        }

        match self.dispatcher.dispatch(&request).await {
            Ok(res) => Ok(res),
            Err(err) => self.recover(request, err).await,
        }
    }

    async fn recover(
        &self,
        mut request: RequestDescriptor,
        err: HttpError,
    ) -> Result<HttpResponse, HttpError> {
        if !err.is_unauthorized() || is_refresh_request(&request) || request.retried() {
            return Err(err);
        }

        let role = {
            let mut cycles = self.shared.cycles.lock().await;
            // Checked under the same lock eject takes, so no cycle can open after it.
            if cycles.ejected {
                return Err(err);
            }
            match cycles.enqueue() {
                Some((cycle, queued, rx)) => {
                    debug!(cycle, queued, path = %request.path, "queued behind token refresh");
                    Role::Waiter(rx)
                }
                None => {
                    let shared = self.shared.clone();
                    let limit = self.refresh_timeout;
                    let (cycle, rx) =
                        cycles.begin(|cycle| tokio::spawn(shared.run_cycle(cycle, limit)));
                    Role::Initiator(cycle, rx)
                }
            }
        };

        let rx = match role {
            Role::Initiator(cycle, rx) => {
                request.mark_retried();
                info!(cycle, path = %request.path, "access token rejected; refreshing");
                rx
            }
            Role::Waiter(rx) => rx,
        };

        // A dropped sender means the cycle was torn down.
        let token = rx.await.unwrap_or(Err(HttpError::Disposed))?;
        request.mark_retried();
        request.bearer(&token);
        self.dispatcher.dispatch(&request).await
    }

    /// Returns to idle, rejecting every request still tied to an in-flight refresh
    /// with [`HttpError::Disposed`] and aborting the refresh itself. Interception
    /// stays active.
    ///
    /// Waits for the aborted refresh to stop, so it must not be called from inside
    /// [`RefreshHooks::refresh_tokens`].
    pub async fn reset_state(&self) {
        self.teardown(false).await;
    }

    /// Stops intercepting: later requests go straight to the dispatcher.
    pub async fn eject(&self) {
        self.teardown(true).await;
        debug!("token refresh coordinator ejected");
    }

    async fn teardown(&self, eject: bool) {
        let (pending, task) = {
            let mut cycles = self.shared.cycles.lock().await;
            cycles.ejected |= eject;
            cycles.clear()
        };
        if !pending.is_empty() {
            warn!(pending = pending.len(), "refresh state reset with requests still pending");
        }
        for waiter in pending {
            waiter.resolve(Err(HttpError::Disposed));
        }
        if let Some(task) = task {
            task.abort();
            match task.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => debug!("in-flight token refresh aborted"),
                Err(err) => warn!(error = %err, "token refresh task failed"),
            }
        }
    }

    pub async fn is_ejected(&self) -> bool {
        self.shared.cycles.lock().await.ejected
    }

    pub async fn is_refreshing(&self) -> bool {
        matches!(
            self.shared.cycles.lock().await.state,
            RefreshState::Refreshing { .. }
        )
    }

    /// Requests queued behind the in-flight refresh, not counting the one that started it.
    pub async fn pending_waiters(&self) -> usize {
        match &self.shared.cycles.lock().await.state {
            RefreshState::Refreshing { waiters, .. } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }
}

#[async_trait]
impl Dispatcher for TokenRefreshCoordinator {
    async fn dispatch(&self, request: &RequestDescriptor) -> Result<HttpResponse, HttpError> {
        self.execute(request.clone()).await
    }
}

fn is_refresh_request(request: &RequestDescriptor) -> bool {
    request.path.contains(REFRESH_PATH)
}
