#![forbid(unsafe_code)]

use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;

use pagebeat_contracts::hit::HitPayload;

use crate::host::BeaconSink;

/// What happened to one dispatch attempt. Delivery problems are reported
/// here for diagnostics and tests, never as errors: nothing throws past this
/// layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued on the fire-and-forget beacon; initiation success is treated
    /// as delivery success because no acknowledgement is possible.
    BeaconQueued,
    /// The endpoint acknowledged with 200 or 202.
    Delivered(u16),
    /// The attempt failed (bad status, broken response, transport error)
    /// and was converted into success. Some hits are silently lost; that is
    /// the accepted cost of never surfacing tracking failures to a visitor.
    Synthesized,
    /// Beacon initiation was rejected synchronously before anything left
    /// the page.
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportReceipt {
    pub outcome: DeliveryOutcome,
}

impl TransportReceipt {
    pub fn accepted(&self) -> bool {
        !matches!(self.outcome, DeliveryOutcome::Dropped)
    }
}

/// Delivery abstraction for hit payloads. Implementations must be
/// infallible from the caller's point of view.
pub trait HitTransport {
    fn send(&mut self, payload: &HitPayload) -> TransportReceipt;
}

/// Fire-and-forget delivery over the host beacon primitive.
pub struct BeaconTransport<S: BeaconSink> {
    sink: S,
    endpoint: String,
}

impl<S: BeaconSink> BeaconTransport<S> {
    pub fn new(sink: S, endpoint: impl Into<String>) -> Self {
        Self {
            sink,
            endpoint: endpoint.into(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: BeaconSink> HitTransport for BeaconTransport<S> {
    fn send(&mut self, payload: &HitPayload) -> TransportReceipt {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                log::warn!("hit payload serialization failed: {err}");
                return TransportReceipt {
                    outcome: DeliveryOutcome::Dropped,
                };
            }
        };
        match self.sink.queue(&self.endpoint, &body) {
            Ok(()) => TransportReceipt {
                outcome: DeliveryOutcome::BeaconQueued,
            },
            Err(err) => {
                log::debug!("beacon initiation failed: {err}");
                TransportReceipt {
                    outcome: DeliveryOutcome::Dropped,
                }
            }
        }
    }
}

/// Authenticated-endpoint fallback: POST to the tracking route with a
/// cache-busting token in the query string. 200 and 202 are success; every
/// other result is logged and synthesized into success.
pub struct RestTransport {
    agent: ureq::Agent,
    base_url: String,
}

impl RestTransport {
    pub fn new(base_url: impl Into<String>, timeout_ms: u32) -> Self {
        let timeout = Duration::from_millis(u64::from(timeout_ms).max(100));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { agent, base_url }
    }

    fn track_url(&self) -> String {
        format!("{}/track/", self.base_url)
    }
}

impl HitTransport for RestTransport {
    fn send(&mut self, payload: &HitPayload) -> TransportReceipt {
        let token = cache_bust_token();
        let response = self
            .agent
            .post(&self.track_url())
            .query("token", &token)
            .send_json(payload);
        let outcome = match response {
            Ok(resp) if resp.status() == 200 || resp.status() == 202 => {
                DeliveryOutcome::Delivered(resp.status())
            }
            Ok(resp) => {
                log::warn!("tracking endpoint returned status {}", resp.status());
                DeliveryOutcome::Synthesized
            }
            Err(ureq::Error::Status(code, _)) => {
                log::warn!("tracking endpoint returned status {code}");
                DeliveryOutcome::Synthesized
            }
            Err(err) => {
                log::warn!("tracking delivery failed: {err}");
                DeliveryOutcome::Synthesized
            }
        };
        TransportReceipt { outcome }
    }
}

/// The token has no security purpose; it only defeats intermediary caches.
fn cache_bust_token() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(16);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}
