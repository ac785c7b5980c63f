//! Relay coordinator
//!
//! Owns every signature request from submission to its terminal state.
//!
//! ## Concurrency
//!
//! - The request table is a `DashMap`; a transition runs under the entry's
//!   shard write lock and only ever leaves `Pending`, so each request reaches
//!   exactly one terminal state and status never moves backwards.
//! - Deadlines live in a min-heap drained by a single reaper task. Entries for
//!   requests that already settled are discarded when popped, so resolving a
//!   request needs no timer bookkeeping and a late deadline cannot fire.
//! - A request is stored as `Pending` before it is handed to the MPC network.

use super::{MpcNetwork, MpcOutcome, MpcResponse, MpcSignRequest, ResponseSink};
use crate::{
    Error, RejectionReason, RequestId, RequestStatus, Result, Signature, SignatureRequest,
    TokenRejection, ValidToken,
};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a request may stay pending before it expires
    pub request_timeout: Duration,
    /// How long terminal requests stay queryable
    pub retention: Duration,
    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(600),
            event_capacity: 1024,
        }
    }
}

impl CoordinatorConfig {
    /// Set the pending-request timeout window
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the terminal-request retention window
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// Coordinator statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct CoordinatorStats {
    pub total_submitted: u64,
    pub total_resolved: u64,
    pub total_rejected: u64,
    pub total_expired: u64,
    pub total_cancelled: u64,
    /// Requests currently pending
    pub pending: usize,
}

/// Published on every terminal transition
#[derive(Debug, Clone)]
pub struct RequestEvent {
    /// The request in its terminal state
    pub request: SignatureRequest,
}

impl RequestEvent {
    /// Event name used by push surfaces
    pub fn name(&self) -> &'static str {
        match self.request.status() {
            RequestStatus::Pending => "request_pending",
            RequestStatus::Resolved { .. } => "request_resolved",
            RequestStatus::Rejected { .. } => "request_rejected",
            RequestStatus::Expired => "request_expired",
        }
    }
}

struct TrackedRequest {
    request: SignatureRequest,
    status_tx: watch::Sender<RequestStatus>,
}

struct Inner {
    requests: DashMap<RequestId, TrackedRequest>,
    deadlines: Mutex<BinaryHeap<Reverse<(Instant, RequestId)>>>,
    wake: Arc<Notify>,
    network: Arc<dyn MpcNetwork>,
    config: CoordinatorConfig,
    stats: RwLock<CoordinatorStats>,
    events: broadcast::Sender<RequestEvent>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl Inner {
    /// Move a pending request to `status`; false if unknown or already terminal
    fn finish(&self, id: &str, status: RequestStatus) -> bool {
        let settled = {
            let Some(mut tracked) = self.requests.get_mut(id) else {
                return false;
            };
            if !tracked.request.transition(status) {
                return false;
            }
            let current = tracked.request.status().clone();
            tracked.status_tx.send_replace(current);
            tracked.request.clone()
        };

        {
            let mut stats = self.stats.write();
            match settled.status() {
                RequestStatus::Resolved { .. } => stats.total_resolved += 1,
                RequestStatus::Rejected {
                    reason: RejectionReason::Cancelled,
                } => stats.total_cancelled += 1,
                RequestStatus::Rejected { .. } => stats.total_rejected += 1,
                RequestStatus::Expired => stats.total_expired += 1,
                RequestStatus::Pending => {}
            }
        }

        info!(
            request_id = %settled.id(),
            account_path = %settled.account_path(),
            status = %settled.status(),
            "Signature request settled"
        );

        let _ = self.events.send(RequestEvent { request: settled });
        true
    }

    fn schedule(&self, deadline: Instant, id: RequestId) {
        let earliest = {
            let mut heap = self.deadlines.lock();
            let earliest = heap
                .peek()
                .is_none_or(|Reverse((next, _))| deadline < *next);
            heap.push(Reverse((deadline, id)));
            earliest
        };
        if earliest {
            self.wake.notify_one();
        }
    }

    /// Expire every request whose deadline has passed; returns the next deadline
    fn expire_due(&self, now: Instant) -> Option<Instant> {
        loop {
            let id = {
                let mut heap = self.deadlines.lock();
                let next = heap.peek().map(|Reverse((deadline, _))| *deadline);
                match next {
                    Some(deadline) if deadline <= now => heap.pop().map(|Reverse((_, id))| id),
                    other => return other,
                }
            };

            if let Some(id) = id
                && self.finish(&id, RequestStatus::Expired)
            {
                debug!(request_id = %id, "Reaper expired signature request");
            }
        }
    }

    fn pending_ids(&self, filter: impl Fn(&SignatureRequest) -> bool) -> Vec<RequestId> {
        self.requests
            .iter()
            .filter(|e| e.request.is_pending() && filter(&e.request))
            .map(|e| e.key().clone())
            .collect()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Lets the reaper observe that the coordinator is gone
        self.wake.notify_one();
    }
}

async fn run_reaper(inner: Weak<Inner>, wake: Arc<Notify>) {
    loop {
        let next = {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if inner.shut_down.load(Ordering::Acquire) {
                break;
            }
            inner.expire_due(Instant::now())
        };

        match next {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = wake.notified() => {}
                }
            }
            None => wake.notified().await,
        }
    }
    debug!("Expiry reaper stopped");
}

/// Tracks signature requests through the MPC network
///
/// Cloning is cheap; clones share the same request table.
#[derive(Clone)]
pub struct RelayCoordinator {
    inner: Arc<Inner>,
}

impl RelayCoordinator {
    /// Create a coordinator and start its expiry reaper
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: CoordinatorConfig, network: Arc<dyn MpcNetwork>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let wake = Arc::new(Notify::new());

        let inner = Arc::new(Inner {
            requests: DashMap::new(),
            deadlines: Mutex::new(BinaryHeap::new()),
            wake: Arc::clone(&wake),
            network,
            config,
            stats: RwLock::new(CoordinatorStats::default()),
            events,
            reaper: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        });

        let reaper = tokio::spawn(run_reaper(Arc::downgrade(&inner), wake));
        *inner.reaper.lock() = Some(reaper);

        info!(
            timeout_ms = inner.config.request_timeout.as_millis() as u64,
            "Relay coordinator started"
        );

        Self { inner }
    }

    /// Configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Register `request` as pending and forward it to the MPC network
    ///
    /// `token` must be the freshly validated token of the caller; the request
    /// is refused if the token has expired since, or if it was built for a
    /// different account path than the token authenticates.
    pub fn submit(&self, request: SignatureRequest, token: &ValidToken) -> Result<SignatureHandle> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(Error::Internal("relay coordinator is shut down".to_string()));
        }
        if token.is_expired() {
            return Err(Error::invalid_token(TokenRejection::Expired));
        }
        if request.account_path() != token.account_path() {
            return Err(Error::InvalidRequest(
                "account path does not match the authenticated identity".to_string(),
            ));
        }
        if !request.is_pending() {
            return Err(Error::InvalidRequest("request is not pending".to_string()));
        }

        let id = request.id().to_string();
        let wire = MpcSignRequest::from(&request);
        let deadline = Instant::now() + self.inner.config.request_timeout;
        let (status_tx, status_rx) = watch::channel(RequestStatus::Pending);

        match self.inner.requests.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::InvalidRequest(format!("duplicate request id {}", id)));
            }
            Entry::Vacant(slot) => {
                slot.insert(TrackedRequest { request, status_tx });
            }
        }
        self.inner.schedule(deadline, id.clone());
        self.inner.stats.write().total_submitted += 1;

        // A shutdown that raced past the check above has already swept the table
        if self.inner.shut_down.load(Ordering::SeqCst) {
            self.inner.finish(
                &id,
                RequestStatus::Rejected {
                    reason: RejectionReason::Cancelled,
                },
            );
            return Err(Error::Cancelled(id));
        }

        info!(
            request_id = %id,
            account_path = %wire.account_path,
            key_type = %wire.key_type,
            payload_kind = %wire.payload_kind,
            "Signature request submitted"
        );

        let network = Arc::clone(&self.inner.network);
        let inner = Arc::downgrade(&self.inner);
        let forward_id = id.clone();
        tokio::spawn(async move {
            match network.forward(wire).await {
                Ok(()) => debug!(request_id = %forward_id, "Forwarded to MPC network"),
                Err(e) => {
                    warn!(request_id = %forward_id, error = %e, "Failed to forward to MPC network");
                    if let Some(inner) = inner.upgrade() {
                        inner.finish(
                            &forward_id,
                            RequestStatus::Rejected {
                                reason: RejectionReason::Unreachable(e.to_string()),
                            },
                        );
                    }
                }
            }
        });

        Ok(SignatureHandle {
            id,
            status: status_rx,
        })
    }

    /// Apply an MPC network response
    ///
    /// Returns true if a pending request moved to `Resolved` or `Rejected`.
    pub fn on_mpc_response(&self, response: MpcResponse) -> bool {
        let status = match response.outcome {
            MpcOutcome::Signature { signature } => RequestStatus::Resolved { signature },
            MpcOutcome::Error { error } => RequestStatus::Rejected {
                reason: RejectionReason::Declined(error),
            },
        };

        let applied = self.inner.finish(&response.request_id, status);
        if !applied {
            debug!(
                request_id = %response.request_id,
                "Ignoring MPC response for unknown or settled request"
            );
        }
        applied
    }

    /// Current state of a request
    pub fn get_signature_request(&self, request_id: &str) -> Result<SignatureRequest> {
        self.inner
            .requests
            .get(request_id)
            .map(|tracked| tracked.request.clone())
            .ok_or_else(|| Error::NotFound(request_id.to_string()))
    }

    /// A new handle on an existing request
    pub fn handle(&self, request_id: &str) -> Result<SignatureHandle> {
        self.inner
            .requests
            .get(request_id)
            .map(|tracked| SignatureHandle {
                id: request_id.to_string(),
                status: tracked.status_tx.subscribe(),
            })
            .ok_or_else(|| Error::NotFound(request_id.to_string()))
    }

    /// Cancel a pending request
    ///
    /// Returns false if the request had already settled.
    pub fn cancel(&self, request_id: &str) -> Result<bool> {
        if !self.inner.requests.contains_key(request_id) {
            return Err(Error::NotFound(request_id.to_string()));
        }
        Ok(self.inner.finish(
            request_id,
            RequestStatus::Rejected {
                reason: RejectionReason::Cancelled,
            },
        ))
    }

    /// Cancel every pending request of an account; returns how many were cancelled
    pub fn cancel_account(&self, account_path: &str) -> usize {
        let ids = self
            .inner
            .pending_ids(|request| request.account_path() == account_path);
        let cancelled = ids
            .iter()
            .filter(|id| {
                self.inner.finish(
                    id,
                    RequestStatus::Rejected {
                        reason: RejectionReason::Cancelled,
                    },
                )
            })
            .count();

        if cancelled > 0 {
            info!(account_path = %account_path, cancelled, "Cancelled pending requests");
        }
        cancelled
    }

    /// Stop the reaper and cancel every pending request
    ///
    /// Later submissions fail. Returns the number of cancelled requests.
    pub fn shutdown(&self) -> usize {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return 0;
        }
        if let Some(reaper) = self.inner.reaper.lock().take() {
            reaper.abort();
        }

        let ids = self.inner.pending_ids(|_| true);
        let cancelled = ids
            .iter()
            .filter(|id| {
                self.inner.finish(
                    id,
                    RequestStatus::Rejected {
                        reason: RejectionReason::Cancelled,
                    },
                )
            })
            .count();
        self.inner.deadlines.lock().clear();

        info!(cancelled, "Relay coordinator shut down");
        cancelled
    }

    /// Whether `shutdown` was called
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Drop terminal requests older than the retention window
    pub fn cleanup(&self) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.inner.config.retention) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return 0;
        };

        let before = self.inner.requests.len();
        self.inner.requests.retain(|_, tracked| {
            tracked
                .request
                .completed_at()
                .is_none_or(|completed| completed > cutoff)
        });
        let removed = before.saturating_sub(self.inner.requests.len());

        if removed > 0 {
            debug!(removed, "Removed settled signature requests");
        }
        removed
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CoordinatorStats {
        let mut stats = self.inner.stats.read().clone();
        stats.pending = self
            .inner
            .requests
            .iter()
            .filter(|e| e.request.is_pending())
            .count();
        stats
    }

    /// Subscribe to terminal transitions
    pub fn subscribe(&self) -> broadcast::Receiver<RequestEvent> {
        self.inner.events.subscribe()
    }

    /// A response sink that does not keep the coordinator alive
    pub fn response_sink(&self) -> Arc<dyn ResponseSink> {
        Arc::new(CoordinatorSink {
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Number of tracked requests
    pub fn len(&self) -> usize {
        self.inner.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.requests.is_empty()
    }
}

impl ResponseSink for RelayCoordinator {
    fn on_mpc_response(&self, response: MpcResponse) -> bool {
        RelayCoordinator::on_mpc_response(self, response)
    }
}

impl std::fmt::Debug for RelayCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayCoordinator")
            .field("requests", &self.inner.requests.len())
            .field("config", &self.inner.config)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

struct CoordinatorSink {
    inner: Weak<Inner>,
}

impl ResponseSink for CoordinatorSink {
    fn on_mpc_response(&self, response: MpcResponse) -> bool {
        match self.inner.upgrade() {
            Some(inner) => RelayCoordinator { inner }.on_mpc_response(response),
            None => false,
        }
    }
}

/// Caller-side view of a submitted request
#[derive(Debug, Clone)]
pub struct SignatureHandle {
    id: RequestId,
    status: watch::Receiver<RequestStatus>,
}

impl SignatureHandle {
    /// Request id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest status
    pub fn status(&self) -> RequestStatus {
        self.status.borrow().clone()
    }

    /// Wait for the next status change
    ///
    /// Returns `None` once the request has been dropped from the table.
    pub async fn changed(&mut self) -> Option<RequestStatus> {
        self.status.changed().await.ok()?;
        Some(self.status.borrow_and_update().clone())
    }

    /// Wait for the terminal status
    ///
    /// `Resolved` yields the signature; `Rejected`, `Expired` and a cancelled
    /// request yield `Error::Rejected`, `Error::Expired` and `Error::Cancelled`.
    pub async fn wait(mut self) -> Result<Signature> {
        let status = self
            .status
            .wait_for(RequestStatus::is_terminal)
            .await
            .map_err(|_| Error::Internal(format!("request {} was dropped", self.id)))?
            .clone();

        status
            .outcome(&self.id)
            .unwrap_or_else(|| Err(Error::Internal(format!("request {} still pending", self.id))))
    }
}
