#![forbid(unsafe_code)]

//! Portable client core of the hit-tracking protocol: eligibility gating,
//! visitor identity resolution, the hit lifecycle state machine and the
//! delivery transports. The embedding host supplies browser capabilities
//! through the traits in [`host`]; everything here is synchronous and
//! deterministic given those bindings.

pub mod eligibility;
pub mod host;
pub mod identity;
pub mod lifecycle;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use eligibility::{ConsentState, EligibilityGate, STATISTICS_CONSENT_CATEGORY};
pub use host::{BeaconSink, BrowserSignals, Clock, CookieJar, HostBindings, HostError, PageTimer};
pub use identity::{IdentityError, IdentityResolver};
pub use lifecycle::{
    DispatchOutcome, PageContext, Tracker, TrackerEvent, TrackerObserver, TrackerOptions,
    MIN_DISPATCH_INTERVAL_MS,
};
pub use transport::{BeaconTransport, DeliveryOutcome, HitTransport, RestTransport, TransportReceipt};
