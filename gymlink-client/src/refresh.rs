use std::{collections::VecDeque, sync::Arc};

use futures::channel::oneshot;
use parking_lot::Mutex;

use crate::{
    api::{paths, ApiRequest, ApiResponse, Transport},
    Error, RefreshFailure, SessionEvent, SessionEventBus,
};

/// A request waiting for the in-flight refresh to settle
struct Pending {
    resume: oneshot::Sender<Result<(), Error>>,
}

enum Phase {
    Idle,
    Refreshing { queue: VecDeque<Pending> },
}

struct RefreshState {
    /// Bumped every time a refresh is answered, successfully or not
    epoch: u64,
    /// Answer of the latest refresh, handed to requests that failed on the
    /// credentials it replaced
    last: Result<(), Error>,
    phase: Phase,
}

/// Single-flight session refresh
///
/// The first request that hits an expired session becomes the leader and
/// issues the only refresh call of the episode. Requests that fail while it is
/// in flight park in a FIFO queue and are woken, in order, with the leader's
/// outcome. Requests whose 401 only comes back once that refresh has been
/// answered reuse its outcome instead of starting another one. Every refresh
/// attempt ends with the state back to `Idle`.
pub struct RefreshCoordinator<T> {
    transport: Arc<T>,
    bus: SessionEventBus,
    state: Mutex<RefreshState>,
}

fn needs_refresh(req: &ApiRequest, resp: &ApiResponse) -> bool {
    resp.status == http::StatusCode::UNAUTHORIZED
        && !req.retried
        && !paths::is_refresh_exempt(&req.path)
}

impl<T: Transport> RefreshCoordinator<T> {
    pub fn new(transport: Arc<T>, bus: SessionEventBus) -> RefreshCoordinator<T> {
        RefreshCoordinator {
            transport,
            bus,
            state: Mutex::new(RefreshState {
                epoch: 0,
                last: Ok(()),
                phase: Phase::Idle,
            }),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Refreshing { .. })
    }

    /// Number of requests currently parked behind the in-flight refresh
    pub fn parked(&self) -> usize {
        match &self.state.lock().phase {
            Phase::Idle => 0,
            Phase::Refreshing { queue } => queue.len(),
        }
    }

    /// Number of refreshes answered so far
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Sends `req`, renewing the session and replaying it once if it hit an
    /// expired session
    ///
    /// Any response other than a recoverable 401 is returned untouched,
    /// including a 401 on an exempt route or on the replay itself.
    pub async fn guard(&self, mut req: ApiRequest) -> Result<ApiResponse, Error> {
        let sent_at = self.epoch();
        let resp = self.transport.send(req.clone()).await?;
        if !needs_refresh(&req, &resp) {
            return Ok(resp);
        }
        tracing::debug!(path = %req.path, "request hit an expired session");
        self.renew_since(sent_at).await?;
        req.retried = true;
        tracing::debug!(path = %req.path, "replaying request after session refresh");
        Ok(self.transport.send(req).await?)
    }

    /// Waits for the session to be renewed, starting the refresh if none is
    /// in flight
    pub async fn renew(&self) -> Result<(), Error> {
        let epoch = self.epoch();
        self.renew_since(epoch).await
    }

    /// Like `renew`, for a caller whose credentials were last used at
    /// `epoch`: if a refresh has been answered since, its outcome is returned
    /// without refreshing again
    async fn renew_since(&self, epoch: u64) -> Result<(), Error> {
        let parked = {
            let mut state = self.state.lock();
            let state = &mut *state;
            match &mut state.phase {
                Phase::Refreshing { queue } => {
                    let (resume, wait) = oneshot::channel();
                    queue.push_back(Pending { resume });
                    Some(wait)
                }
                Phase::Idle if state.epoch != epoch => {
                    tracing::trace!(
                        since = epoch,
                        now = state.epoch,
                        "session already refreshed after the request was sent"
                    );
                    return state.last.clone();
                }
                Phase::Idle => {
                    state.phase = Phase::Refreshing {
                        queue: VecDeque::new(),
                    };
                    None
                }
            }
        };
        if let Some(wait) = parked {
            tracing::trace!("parking until the in-flight refresh settles");
            return wait
                .await
                .unwrap_or(Err(Error::SessionExpired(RefreshFailure::Abandoned)));
        }

        let mut leader = Leader {
            coordinator: self,
            settled: false,
        };
        let outcome = self.call_refresh().await;
        leader.settle(outcome.clone());
        outcome
    }

    async fn call_refresh(&self) -> Result<(), Error> {
        tracing::debug!("refreshing session");
        match self.transport.send(ApiRequest::post(paths::REFRESH)).await {
            Ok(resp) if resp.status.is_success() => Ok(()),
            Ok(resp) => Err(Error::SessionExpired(RefreshFailure::Rejected(
                resp.status,
            ))),
            Err(e) => Err(Error::SessionExpired(RefreshFailure::Transport(e))),
        }
    }

    fn settle(&self, outcome: Result<(), Error>) {
        let queue = {
            let mut state = self.state.lock();
            // an abandoned refresh was never answered, so it opens no new epoch
            if outcome != Err(Error::SessionExpired(RefreshFailure::Abandoned)) {
                state.epoch += 1;
                state.last = outcome.clone();
            }
            match std::mem::replace(&mut state.phase, Phase::Idle) {
                Phase::Refreshing { queue } => queue,
                Phase::Idle => VecDeque::new(),
            }
        };
        match &outcome {
            Ok(()) => tracing::debug!(parked = queue.len(), "session refreshed"),
            Err(Error::SessionExpired(RefreshFailure::Abandoned)) => {
                tracing::warn!(parked = queue.len(), "session refresh abandoned")
            }
            Err(err) => {
                tracing::warn!(?err, parked = queue.len(), "session refresh failed");
                self.bus.publish(SessionEvent::Invalidated);
            }
        }
        for p in queue {
            // the parked caller may have given up waiting
            let _ = p.resume.send(outcome.clone());
        }
    }
}

/// Settles the episode even if the leading future is dropped mid-refresh
struct Leader<'a, T: Transport> {
    coordinator: &'a RefreshCoordinator<T>,
    settled: bool,
}

impl<'a, T: Transport> Leader<'a, T> {
    fn settle(&mut self, outcome: Result<(), Error>) {
        self.settled = true;
        self.coordinator.settle(outcome);
    }
}

impl<'a, T: Transport> Drop for Leader<'a, T> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator
                .settle(Err(Error::SessionExpired(RefreshFailure::Abandoned)));
        }
    }
}
