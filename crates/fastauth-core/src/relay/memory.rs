//! In-memory MPC network for testing and local development

use super::{MpcNetwork, MpcOutcome, MpcResponse, MpcSignRequest, ResponseSink, async_trait};
use crate::{Error, Result, Signature};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

type Responder = Arc<dyn Fn(&MpcSignRequest) -> Option<MpcOutcome> + Send + Sync>;

struct MemoryInner {
    forwarded: Mutex<Vec<MpcSignRequest>>,
    notify: broadcast::Sender<()>,
    sink: RwLock<Option<Arc<dyn ResponseSink>>>,
    responder: RwLock<Option<Responder>>,
    unreachable: RwLock<Option<String>>,
    reply_delay: RwLock<Duration>,
}

/// In-process stand-in for the MPC signing network
///
/// Records every forwarded request. Once connected to a [`ResponseSink`] it
/// can answer requests itself, which is useful for:
/// - Unit and integration testing
/// - Local development without a signing network
#[derive(Clone)]
pub struct MemoryMpcNetwork {
    inner: Arc<MemoryInner>,
}

impl MemoryMpcNetwork {
    /// Create a network that records requests and never answers
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1000);
        Self {
            inner: Arc::new(MemoryInner {
                forwarded: Mutex::new(Vec::new()),
                notify,
                sink: RwLock::new(None),
                responder: RwLock::new(None),
                unreachable: RwLock::new(None),
                reply_delay: RwLock::new(Duration::ZERO),
            }),
        }
    }

    /// Deliver automatic answers to `sink`
    pub fn connect(&self, sink: Arc<dyn ResponseSink>) {
        *self.inner.sink.write() = Some(sink);
    }

    /// Answer each request with the outcome `responder` returns
    ///
    /// `None` leaves the request unanswered.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&MpcSignRequest) -> Option<MpcOutcome> + Send + Sync + 'static,
    {
        *self.inner.responder.write() = Some(Arc::new(responder));
    }

    /// Answer every request with `signature`
    pub fn auto_sign(&self, signature: Signature) {
        self.respond_with(move |_| {
            Some(MpcOutcome::Signature {
                signature: signature.clone(),
            })
        });
    }

    /// Answer every request with an error
    pub fn auto_reject(&self, error: impl Into<String>) {
        let error = error.into();
        self.respond_with(move |_| {
            Some(MpcOutcome::Error {
                error: error.clone(),
            })
        });
    }

    /// Delay automatic answers
    pub fn set_reply_delay(&self, delay: Duration) {
        *self.inner.reply_delay.write() = delay;
    }

    /// Make `forward` fail with a transport error, or succeed again with `None`
    pub fn set_unreachable(&self, error: Option<String>) {
        *self.inner.unreachable.write() = error;
    }

    /// Requests forwarded so far
    pub fn forwarded(&self) -> Vec<MpcSignRequest> {
        self.inner.forwarded.lock().clone()
    }

    /// Number of requests forwarded so far
    pub fn forwarded_count(&self) -> usize {
        self.inner.forwarded.lock().len()
    }

    /// Wait until at least `count` requests have been forwarded
    pub async fn wait_for_forwarded(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<Vec<MpcSignRequest>> {
        let mut rx = self.inner.notify.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let forwarded = self.inner.forwarded.lock();
                if forwarded.len() >= count {
                    return Ok(forwarded.clone());
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::Network(format!(
                    "timed out waiting for {} forwarded requests",
                    count
                )));
            }

            tokio::select! {
                _ = rx.recv() => continue,
                _ = tokio::time::sleep(Duration::from_millis(100).min(remaining)) => continue,
            }
        }
    }

    /// Forget recorded requests
    pub fn clear(&self) {
        self.inner.forwarded.lock().clear();
    }
}

impl Default for MemoryMpcNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryMpcNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMpcNetwork")
            .field("forwarded", &self.forwarded_count())
            .field("connected", &self.inner.sink.read().is_some())
            .finish()
    }
}

#[async_trait]
impl MpcNetwork for MemoryMpcNetwork {
    async fn forward(&self, request: MpcSignRequest) -> Result<()> {
        if let Some(error) = self.inner.unreachable.read().clone() {
            return Err(Error::Network(error));
        }

        let reply = {
            let responder = self.inner.responder.read().clone();
            let sink = self.inner.sink.read().clone();
            match (responder, sink) {
                (Some(responder), Some(sink)) => responder(&request).map(|outcome| {
                    (
                        sink,
                        MpcResponse {
                            request_id: request.request_id.clone(),
                            outcome,
                        },
                    )
                }),
                _ => None,
            }
        };

        self.inner.forwarded.lock().push(request);
        let _ = self.inner.notify.send(());

        if let Some((sink, response)) = reply {
            let delay = *self.inner.reply_delay.read();
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                sink.on_mpc_response(response);
            });
        }

        Ok(())
    }
}
