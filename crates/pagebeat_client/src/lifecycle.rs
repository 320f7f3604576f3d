#![forbid(unsafe_code)]

use pagebeat_contracts::hit::{HitKind, HitPayload};
use pagebeat_contracts::identity::VisitorIdentity;
use pagebeat_contracts::GoalId;

use crate::eligibility::{ConsentState, EligibilityGate, STATISTICS_CONSENT_CATEGORY};
use crate::host::HostBindings;
use crate::identity::{IdentityError, IdentityResolver};

/// Minimum interval between dispatch attempts. Collapses duplicate events
/// firing back-to-back, e.g. `visibilitychange` and `pagehide` on the same
/// navigation.
pub const MIN_DISPATCH_INTERVAL_MS: u64 = 300;

/// Immutable options snapshot, resolved once per page load.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Host defers tracking start until the full page has loaded.
    pub turbo_mode: bool,
    pub cookieless: bool,
    pub beacon_enabled: bool,
    pub respect_do_not_track: bool,
    pub track_url_changes: bool,
    pub cookie_namespace: String,
    pub cookie_retention_days: u16,
    pub min_dispatch_interval_ms: u64,
}

impl TrackerOptions {
    pub fn baseline(cookie_namespace: impl Into<String>) -> Self {
        Self {
            turbo_mode: false,
            cookieless: false,
            beacon_enabled: true,
            respect_do_not_track: true,
            track_url_changes: false,
            cookie_namespace: cookie_namespace.into(),
            cookie_retention_days: 30,
            min_dispatch_interval_ms: MIN_DISPATCH_INTERVAL_MS,
        }
    }
}

/// Signals the host feeds into the tracker. Navigation interception and
/// consent-banner wiring live outside; they surface here as plain events.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    PageLoaded,
    VisibilityHidden,
    /// Unload fallback for browsers that do not reliably fire visibility
    /// changes on navigation (notably Safari).
    PageHide,
    /// External "fire hit now" request, e.g. a consent banner accept.
    ForceHit,
    ForceUpdate,
    EnableCookies,
    ConsentChanged { category: String, granted: bool },
    UrlChanged { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched(HitKind),
    /// Bot, Do-Not-Track or denied consent. Always silent.
    SuppressedIneligible,
    /// Inside the minimum dispatch interval.
    SuppressedThrottled,
    /// Unforced update after the first one; pings never generate traffic.
    SuppressedNoop,
    /// Payload failed contract validation; logged, never surfaced.
    SuppressedInvalid,
    NoAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    pub url: String,
    pub referrer_url: Option<String>,
}

/// Typed listener registration replacing event-bus custom events. Default
/// methods are no-ops so integrations implement only what they need.
pub trait TrackerObserver {
    fn before_initial_hit(&mut self, _page: &PageContext) {}
    fn before_update_hit(&mut self, _page: &PageContext) {}
    fn payload_built(&mut self, _payload: &HitPayload) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HitState {
    Unsent,
    Tracked,
}

/// The per-page-load hit lifecycle controller. Owns the options snapshot,
/// the eligibility gate, the identity resolver and the dispatch state;
/// constructed once per page load and discarded on navigation.
pub struct Tracker {
    options: TrackerOptions,
    page: PageContext,
    state: HitState,
    first_update_sent: bool,
    last_dispatch_ms: Option<u64>,
    completed_goals: Vec<u32>,
    pending_upgrade: bool,
    consent: ConsentState,
    gate: EligibilityGate,
    identity: IdentityResolver,
    observers: Vec<Box<dyn TrackerObserver>>,
}

impl Tracker {
    pub fn new(options: TrackerOptions, page: PageContext) -> Self {
        let gate = EligibilityGate::new(options.respect_do_not_track);
        let identity = IdentityResolver::new(
            options.cookie_namespace.clone(),
            options.cookie_retention_days,
            options.cookieless,
        );
        Self {
            options,
            page,
            state: HitState::Unsent,
            first_update_sent: false,
            last_dispatch_ms: None,
            completed_goals: Vec::new(),
            pending_upgrade: false,
            consent: ConsentState::NoApi,
            gate,
            identity,
            observers: Vec::new(),
        }
    }

    pub fn register_observer(&mut self, observer: Box<dyn TrackerObserver>) {
        self.observers.push(observer);
    }

    /// Declares that a consent-management API is present on the page and
    /// reports its current "statistics" verdict.
    pub fn set_consent(&mut self, granted: bool) {
        self.consent = if granted {
            ConsentState::Granted
        } else {
            ConsentState::Denied
        };
    }

    pub fn goal_completed(&mut self, goal: GoalId) {
        if !self.completed_goals.contains(&goal.0) {
            self.completed_goals.push(goal.0);
        }
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    pub fn page(&self) -> &PageContext {
        &self.page
    }

    pub fn handle_event(
        &mut self,
        event: TrackerEvent,
        host: &mut HostBindings<'_>,
    ) -> Result<DispatchOutcome, IdentityError> {
        match event {
            TrackerEvent::PageLoaded => self.initial_hit(host),
            TrackerEvent::VisibilityHidden | TrackerEvent::PageHide => self.update_hit(host, true),
            TrackerEvent::ForceUpdate => self.update_hit(host, true),
            TrackerEvent::ForceHit => match self.state {
                HitState::Unsent => self.initial_hit(host),
                HitState::Tracked => self.update_hit(host, true),
            },
            TrackerEvent::EnableCookies => self.enable_cookies(host),
            TrackerEvent::ConsentChanged { category, granted } => {
                if category != STATISTICS_CONSENT_CATEGORY {
                    return Ok(DispatchOutcome::NoAction);
                }
                self.set_consent(granted);
                if granted && self.state == HitState::Unsent {
                    self.initial_hit(host)
                } else {
                    Ok(DispatchOutcome::NoAction)
                }
            }
            TrackerEvent::UrlChanged { url } => {
                if !self.options.track_url_changes {
                    return Ok(DispatchOutcome::NoAction);
                }
                // Each client-rendered page is tracked as a fresh load.
                let previous = std::mem::replace(&mut self.page.url, url);
                self.page.referrer_url = Some(previous);
                self.state = HitState::Unsent;
                self.first_update_sent = false;
                self.initial_hit(host)
            }
        }
    }

    pub fn initial_hit(
        &mut self,
        host: &mut HostBindings<'_>,
    ) -> Result<DispatchOutcome, IdentityError> {
        if !self.eligible(host) {
            return Ok(DispatchOutcome::SuppressedIneligible);
        }
        if self.state == HitState::Tracked {
            return self.update_hit(host, false);
        }
        let now = host.clock.now_ms();
        if self.throttled(now) {
            return Ok(DispatchOutcome::SuppressedThrottled);
        }

        // Optimistic flip: Tracked as soon as the attempt starts, before
        // the send resolves, so a racing trigger cannot fire a second
        // initial hit.
        self.state = HitState::Tracked;
        self.first_update_sent = false;
        let page = self.page.clone();
        for observer in self.observers.iter_mut() {
            observer.before_initial_hit(&page);
        }

        let identity = self.resolve_identity(host)?;
        let time_on_page = read_and_reset_timer(host);
        let (width, height) = host.signals.screen_resolution();
        let payload = match HitPayload::initial(
            self.page.url.clone(),
            self.page.referrer_url.clone(),
            host.signals.user_agent(),
            format!("{width}x{height}"),
            time_on_page,
            self.completed_goals.clone(),
            &identity,
        ) {
            Ok(payload) => payload,
            Err(violation) => {
                log::warn!("initial hit failed contract validation: {violation:?}");
                return Ok(DispatchOutcome::SuppressedInvalid);
            }
        };
        self.dispatch(payload, now, host);
        Ok(DispatchOutcome::Dispatched(HitKind::Initial))
    }

    pub fn update_hit(
        &mut self,
        host: &mut HostBindings<'_>,
        force: bool,
    ) -> Result<DispatchOutcome, IdentityError> {
        if !self.eligible(host) {
            return Ok(DispatchOutcome::SuppressedIneligible);
        }
        if self.state == HitState::Unsent {
            // Nothing has been tracked yet; the first attempt becomes the
            // initial hit regardless of how it was triggered.
            return self.initial_hit(host);
        }
        if !force && self.first_update_sent {
            return Ok(DispatchOutcome::SuppressedNoop);
        }
        let now = host.clock.now_ms();
        if self.throttled(now) {
            return Ok(DispatchOutcome::SuppressedThrottled);
        }

        let page = self.page.clone();
        for observer in self.observers.iter_mut() {
            observer.before_update_hit(&page);
        }

        let identity = self.resolve_identity(host)?;
        let time_on_page = read_and_reset_timer(host);
        let payload = match HitPayload::update(
            self.page.url.clone(),
            time_on_page,
            self.completed_goals.clone(),
            &identity,
        ) {
            Ok(payload) => payload,
            Err(violation) => {
                log::warn!("update hit failed contract validation: {violation:?}");
                return Ok(DispatchOutcome::SuppressedInvalid);
            }
        };
        self.dispatch(payload, now, host);
        self.first_update_sent = true;
        self.pending_upgrade = false;
        Ok(DispatchOutcome::Dispatched(HitKind::Update))
    }

    /// Runtime consent upgrade: cookies become usable, the uid is eagerly
    /// resolved and persisted, and if a fingerprint identity was already in
    /// play one forced update carries BOTH identifiers so the server can
    /// merge the visitor's history.
    fn enable_cookies(
        &mut self,
        host: &mut HostBindings<'_>,
    ) -> Result<DispatchOutcome, IdentityError> {
        self.identity.enable_cookies();
        if !self.identity.use_cookies(host.signals) {
            return Ok(DispatchOutcome::NoAction);
        }
        let had_fingerprint = self.identity.cached_fingerprint().is_some();
        let _ = self.identity.uid(host.cookies, host.signals);
        if had_fingerprint && self.state == HitState::Tracked {
            self.pending_upgrade = true;
            return self.update_hit(host, true);
        }
        Ok(DispatchOutcome::NoAction)
    }

    fn eligible(&mut self, host: &mut HostBindings<'_>) -> bool {
        if self.consent == ConsentState::Denied {
            return false;
        }
        self.gate.is_eligible(host.signals)
    }

    fn throttled(&self, now: u64) -> bool {
        match self.last_dispatch_ms {
            Some(last) => now.saturating_sub(last) < self.options.min_dispatch_interval_ms,
            None => false,
        }
    }

    fn resolve_identity(
        &mut self,
        host: &mut HostBindings<'_>,
    ) -> Result<VisitorIdentity, IdentityError> {
        if self.pending_upgrade {
            if let Some(fingerprint) = self.identity.cached_fingerprint().cloned() {
                let uid = self.identity.uid(host.cookies, host.signals);
                return Ok(VisitorIdentity::Upgrade { uid, fingerprint });
            }
        }
        if self.identity.use_cookies(host.signals) {
            Ok(VisitorIdentity::Uid(
                self.identity.uid(host.cookies, host.signals),
            ))
        } else {
            Ok(VisitorIdentity::Fingerprint(
                self.identity.fingerprint(host.signals)?,
            ))
        }
    }

    /// The attempt timestamp advances whether or not delivery succeeds: a
    /// failed send still counts against the throttle window. One policy,
    /// both paths.
    fn dispatch(&mut self, payload: HitPayload, now: u64, host: &mut HostBindings<'_>) {
        for observer in self.observers.iter_mut() {
            observer.payload_built(&payload);
        }
        self.last_dispatch_ms = Some(now);
        let receipt = host.transport.send(&payload);
        if !receipt.accepted() {
            log::debug!("hit dropped before initiation");
        }
        self.completed_goals.clear();
    }
}

fn read_and_reset_timer(host: &mut HostBindings<'_>) -> u64 {
    let elapsed = host.timer.elapsed_ms();
    host.timer.reset();
    elapsed
}
