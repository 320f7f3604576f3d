#![forbid(unsafe_code)]

//! Shared host mocks for the crate's unit tests.

use std::cell::Cell;
use std::collections::BTreeMap;

use pagebeat_contracts::hit::HitPayload;
use serde_json::Value;

use crate::host::{BeaconSink, BrowserSignals, Clock, CookieJar, HostError, PageTimer};
use crate::transport::{DeliveryOutcome, HitTransport, TransportReceipt};

pub(crate) struct MockSignals {
    pub user_agent: String,
    pub dnt: Vec<String>,
    pub gpc: Option<Value>,
    pub cookies_enabled: bool,
    pub https: bool,
    pub canvas: Result<String, HostError>,
    pub webgl: Result<String, HostError>,
}

impl MockSignals {
    pub fn browser() -> Self {
        Self {
            user_agent:
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36"
                    .to_string(),
            dnt: Vec::new(),
            gpc: None,
            cookies_enabled: true,
            https: true,
            canvas: Ok("canvas_sig".to_string()),
            webgl: Ok("webgl_sig".to_string()),
        }
    }

    pub fn googlebot() -> Self {
        Self {
            user_agent:
                "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)"
                    .to_string(),
            ..Self::browser()
        }
    }
}

impl BrowserSignals for MockSignals {
    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }
    fn do_not_track_signals(&self) -> Vec<String> {
        self.dnt.clone()
    }
    fn global_privacy_control(&self) -> Option<Value> {
        self.gpc.clone()
    }
    fn cookies_enabled(&self) -> bool {
        self.cookies_enabled
    }
    fn is_https(&self) -> bool {
        self.https
    }
    fn screen_resolution(&self) -> (u32, u32) {
        (1920, 1080)
    }
    fn color_depth(&self) -> u32 {
        24
    }
    fn timezone_offset_minutes(&self) -> i32 {
        -120
    }
    fn language(&self) -> String {
        "en-US".to_string()
    }
    fn platform(&self) -> String {
        "Linux x86_64".to_string()
    }
    fn plugins(&self) -> Vec<String> {
        vec!["pdf-viewer".to_string()]
    }
    fn touch_support(&self) -> bool {
        false
    }
    fn canvas_signature(&self) -> Result<String, HostError> {
        self.canvas.clone()
    }
    fn webgl_signature(&self) -> Result<String, HostError> {
        self.webgl.clone()
    }
}

#[derive(Default)]
pub(crate) struct MockJar {
    pub store: BTreeMap<String, String>,
    pub writes: usize,
}

impl CookieJar for MockJar {
    fn read(&self, name: &str) -> Option<String> {
        self.store.get(name).cloned()
    }
    fn write(&mut self, name: &str, value: &str, _retention_days: u16, _secure: bool) {
        self.writes += 1;
        self.store.insert(name.to_string(), value.to_string());
    }
}

#[derive(Default)]
pub(crate) struct MockTimer {
    pub elapsed: u64,
    pub resets: usize,
}

impl PageTimer for MockTimer {
    fn elapsed_ms(&self) -> u64 {
        self.elapsed
    }
    fn reset(&mut self) {
        self.elapsed = 0;
        self.resets += 1;
    }
}

pub(crate) struct MockClock {
    pub now: Cell<u64>,
}

impl MockClock {
    pub fn at(now: u64) -> Self {
        Self { now: Cell::new(now) }
    }
    pub fn advance(&self, delta: u64) {
        self.now.set(self.now.get() + delta);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

#[derive(Default)]
pub(crate) struct MockTransport {
    pub sent: Vec<HitPayload>,
}

impl HitTransport for MockTransport {
    fn send(&mut self, payload: &HitPayload) -> TransportReceipt {
        self.sent.push(payload.clone());
        TransportReceipt {
            outcome: DeliveryOutcome::Delivered(202),
        }
    }
}

#[derive(Default)]
pub(crate) struct MockBeacon {
    pub queued: Vec<Vec<u8>>,
    pub reject: bool,
}

impl BeaconSink for MockBeacon {
    fn queue(&mut self, _endpoint: &str, body: &[u8]) -> Result<(), HostError> {
        if self.reject {
            return Err(HostError::BeaconRejected);
        }
        self.queued.push(body.to_vec());
        Ok(())
    }
}
