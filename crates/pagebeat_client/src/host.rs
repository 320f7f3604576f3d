#![forbid(unsafe_code)]

//! Capabilities the embedding host must provide. The core never touches the
//! browser directly: navigation observation is inverted (the host feeds
//! [`crate::TrackerEvent`]s in) and every probe/side effect goes through one
//! of these traits, so the whole protocol is testable with plain mocks.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    ProbeUnavailable(&'static str),
    BeaconRejected,
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProbeUnavailable(probe) => write!(f, "host probe unavailable: {probe}"),
            Self::BeaconRejected => write!(f, "beacon initiation rejected"),
        }
    }
}

impl std::error::Error for HostError {}

/// Read-only view of the browser environment. The canvas/WebGL probes are
/// fallible: they may involve rendering work the host refuses or cannot do,
/// and that failure must stay visible to the identity resolver.
pub trait BrowserSignals {
    fn user_agent(&self) -> String;
    /// Raw values reported by the legacy/standard Do-Not-Track channels,
    /// in whatever order the host enumerates them.
    fn do_not_track_signals(&self) -> Vec<String>;
    /// Raw Global Privacy Control value. The channel is loosely typed on
    /// real pages, hence the JSON value instead of a bool.
    fn global_privacy_control(&self) -> Option<serde_json::Value>;
    fn cookies_enabled(&self) -> bool;
    fn is_https(&self) -> bool;
    fn screen_resolution(&self) -> (u32, u32);
    fn color_depth(&self) -> u32;
    fn timezone_offset_minutes(&self) -> i32;
    fn language(&self) -> String;
    fn platform(&self) -> String;
    fn plugins(&self) -> Vec<String>;
    fn touch_support(&self) -> bool;
    fn canvas_signature(&self) -> Result<String, HostError>;
    fn webgl_signature(&self) -> Result<String, HostError>;
}

/// Persistent cookie access. Writes always apply `SameSite=Strict` and
/// path `/`; `secure` follows the page scheme.
pub trait CookieJar {
    fn read(&self, name: &str) -> Option<String>;
    fn write(&mut self, name: &str, value: &str, retention_days: u16, secure: bool);
}

/// The external time-on-page collaborator. Every dispatch reads the elapsed
/// value and resets the accumulator so time never double-counts across hits.
pub trait PageTimer {
    fn elapsed_ms(&self) -> u64;
    fn reset(&mut self);
}

pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Fire-and-forget delivery primitive. Queue initiation may fail
/// synchronously; once queued there is no acknowledgement.
pub trait BeaconSink {
    fn queue(&mut self, endpoint: &str, body: &[u8]) -> Result<(), HostError>;
}

/// One page-load's worth of host capabilities, handed to the tracker on
/// every event.
pub struct HostBindings<'a> {
    pub signals: &'a dyn BrowserSignals,
    pub cookies: &'a mut dyn CookieJar,
    pub timer: &'a mut dyn PageTimer,
    pub clock: &'a dyn Clock,
    pub transport: &'a mut dyn crate::transport::HitTransport,
}
