use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};

use urd_store::Replica;
use urd_types::{Address, UrdError};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// The only methods allowed on the fan-out path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl TryFrom<&str> for Method {
    type Error = UrdError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "GET" => Ok(Method::Get),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(UrdError::InvalidMethod(other.to_string())),
        }
    }
}

/// One request fanned out to a set of peers.
#[derive(Debug, Clone)]
pub struct PeerRequest {
    pub method: Method,
    /// Path starting with `/`.
    pub endpoint: String,
    pub payload: Value,
    pub targets: Vec<Address>,
}

/// A peer that did not acknowledge a broadcast round.
///
/// `retryable` is set only for 503 — the peer is alive but its clock is not
/// ready yet. Anything transport-level means the peer gets evicted.
#[derive(Debug)]
pub struct FailedDelivery {
    pub addr: Address,
    pub retryable: bool,
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Hard timeout per outbound request.
    pub peer_timeout: Duration,
    /// Pause between retry rounds of the delivery loop.
    pub retry_interval: Duration,
    /// Total budget of one delivery loop before it gives up.
    pub delivery_deadline: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastConfig {
            peer_timeout: Duration::from_millis(200),
            retry_interval: Duration::from_millis(200),
            delivery_deadline: Duration::from_secs(15 * 60),
        }
    }
}

/// Outbound side of the replica: serial broadcast, the at-least-once retry
/// loop, and first-success fan-out. Owns the peer-eviction reaction to
/// transport failures.
///
/// Cloning is cheap (shared client and replica handle); background loops
/// carry their own clone.
#[derive(Clone)]
pub struct Broadcaster {
    client: reqwest::Client,
    replica: Arc<Replica>,
    config: BroadcastConfig,
}

impl Broadcaster {
    pub fn new(replica: Arc<Replica>, config: BroadcastConfig) -> Self {
        Broadcaster { client: reqwest::Client::new(), replica, config }
    }

    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    /// One HTTP request to one peer, bounded by the peer timeout.
    pub async fn send_one(
        &self,
        method: Method,
        addr: &str,
        endpoint: &str,
        payload: &Value,
    ) -> Result<reqwest::Response, UrdError> {
        self.client
            .request(method.as_reqwest(), format!("http://{addr}{endpoint}"))
            .timeout(self.config.peer_timeout)
            .json(payload)
            .send()
            .await
            .map_err(|err| UrdError::Transport { addr: addr.to_string(), reason: err.to_string() })
    }

    /// Send to every target serially; report the ones that did not take it.
    pub async fn broadcast(&self, request: &PeerRequest) -> Vec<FailedDelivery> {
        let mut failing = Vec::new();
        for addr in &request.targets {
            match self
                .send_one(request.method, addr, &request.endpoint, &request.payload)
                .await
            {
                Err(err) => {
                    warn!(peer = %addr, endpoint = %request.endpoint, error = %err, "request failed");
                    failing.push(FailedDelivery { addr: addr.clone(), retryable: false });
                }
                Ok(res) if res.status() == StatusCode::SERVICE_UNAVAILABLE => {
                    info!(peer = %addr, endpoint = %request.endpoint, "peer not ready, will retry");
                    failing.push(FailedDelivery { addr: addr.clone(), retryable: true });
                }
                Ok(_) => {}
            }
        }
        failing
    }

    /// At-least-once delivery: every target either takes the request or is
    /// evicted from the view. Only 503 earns a retry; rounds are spaced by
    /// the retry interval and the whole loop aborts at the deadline.
    pub async fn deliver_with_retry(&self, mut request: PeerRequest) -> Result<(), UrdError> {
        let deadline = Instant::now() + self.config.delivery_deadline;

        loop {
            if request.targets.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(endpoint = %request.endpoint, "delivery deadline exceeded");
                return Err(UrdError::Timeout(self.config.delivery_deadline));
            }

            let mut retry = Vec::new();
            for failed in self.broadcast(&request).await {
                if failed.retryable {
                    retry.push(failed.addr);
                } else {
                    self.evict(&failed.addr);
                }
            }
            if retry.is_empty() {
                return Ok(());
            }

            request.targets = retry;
            tokio::time::sleep(self.config.retry_interval).await;
        }
    }

    /// Run a delivery loop in the background. Failures are logged; they are
    /// never reported back to the client whose write already committed.
    pub fn spawn_delivery(&self, request: PeerRequest) {
        if request.targets.is_empty() {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.deliver_with_retry(request).await {
                warn!(error = %err, "background delivery abandoned");
            }
        });
    }

    /// Try targets in order; the first HTTP response wins, whatever its
    /// status — a 503 from the owner is still the owner's answer. Peers that
    /// fail at the transport level are evicted along the way.
    pub async fn first_success(
        &self,
        request: &PeerRequest,
    ) -> Result<reqwest::Response, UrdError> {
        let mut last_err = UrdError::Transport {
            addr: String::new(),
            reason: "no targets".to_string(),
        };
        for addr in &request.targets {
            match self
                .send_one(request.method, addr, &request.endpoint, &request.payload)
                .await
            {
                Ok(res) => return Ok(res),
                Err(err) => {
                    warn!(peer = %addr, endpoint = %request.endpoint, error = %err, "peer unreachable");
                    self.evict(addr);
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    /// Drop a dead peer from the local view; the removal fans out as a view
    /// delete so the rest of the cluster follows.
    fn evict(&self, peer: &Address) {
        let this = self.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            let change = match this.replica.remove_view(&peer).await {
                Ok(change) if change.changed => change,
                _ => return,
            };
            warn!(peer = %peer, "evicted unreachable peer from view");
            let _ = this
                .deliver_with_retry(PeerRequest {
                    method: Method::Delete,
                    endpoint: "/view".to_string(),
                    payload: serde_json::json!({
                        "socket-address": peer,
                        "is-broadcast": true,
                    }),
                    targets: change.fanout,
                })
                .await;
        });
    }
}
