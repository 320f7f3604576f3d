#![forbid(unsafe_code)]

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use pagebeat_contracts::identity::{Fingerprint, Uid};

use crate::host::{BrowserSignals, CookieJar, HostError};

/// Identity resolution failures. This is the one error in the client core
/// that propagates to the caller: a hit genuinely cannot be built without an
/// identity, and "tried and failed" must stay distinguishable from
/// "intentionally not tracking".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    FingerprintProbe(HostError),
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FingerprintProbe(err) => write!(f, "fingerprint probe failed: {err}"),
        }
    }
}

impl std::error::Error for IdentityError {}

/// Resolves and caches the visitor identity for one page load. Either the
/// cookie-backed uid or the computed fingerprint is active, chosen by
/// `use_cookies`; both caches survive until the page is discarded.
#[derive(Debug)]
pub struct IdentityResolver {
    cookie_namespace: String,
    retention_days: u16,
    cookieless: bool,
    use_cookies_cache: Option<bool>,
    cached_uid: Option<Uid>,
    cached_fingerprint: Option<Fingerprint>,
}

impl IdentityResolver {
    pub fn new(cookie_namespace: impl Into<String>, retention_days: u16, cookieless: bool) -> Self {
        Self {
            cookie_namespace: cookie_namespace.into(),
            retention_days,
            cookieless,
            use_cookies_cache: None,
            cached_uid: None,
            cached_fingerprint: None,
        }
    }

    pub fn cookie_name(&self) -> String {
        format!("{}_uid", self.cookie_namespace)
    }

    /// True iff the browser reports cookies enabled and the page is not
    /// configured cookieless. Cached per page load.
    pub fn use_cookies(&mut self, signals: &dyn BrowserSignals) -> bool {
        if let Some(cached) = self.use_cookies_cache {
            return cached;
        }
        let verdict = signals.cookies_enabled() && !self.cookieless;
        self.use_cookies_cache = Some(verdict);
        verdict
    }

    /// Cache, then persisted cookie, then a freshly generated token. Every
    /// path populates the cache, so repeated calls return the identical
    /// value without touching the jar again.
    pub fn uid(&mut self, cookies: &mut dyn CookieJar, signals: &dyn BrowserSignals) -> Uid {
        if let Some(uid) = &self.cached_uid {
            return uid.clone();
        }
        let name = self.cookie_name();
        if let Some(raw) = cookies.read(&name) {
            if let Ok(uid) = Uid::new(raw) {
                self.cached_uid = Some(uid.clone());
                return uid;
            }
            // Malformed cookie values are replaced, not propagated.
        }
        let uid = Uid::new(random_hex32()).expect("generated uid is 32 lowercase hex");
        cookies.write(&name, uid.as_str(), self.retention_days, signals.is_https());
        self.cached_uid = Some(uid.clone());
        uid
    }

    /// Cache, then a sha-256 digest over the fixed ordered signal list.
    /// Probe failures propagate; a hit must never be sent with a silently
    /// swallowed fingerprint error.
    pub fn fingerprint(
        &mut self,
        signals: &dyn BrowserSignals,
    ) -> Result<Fingerprint, IdentityError> {
        if let Some(fingerprint) = &self.cached_fingerprint {
            return Ok(fingerprint.clone());
        }
        let canvas = signals
            .canvas_signature()
            .map_err(IdentityError::FingerprintProbe)?;
        let webgl = signals
            .webgl_signature()
            .map_err(IdentityError::FingerprintProbe)?;
        let (width, height) = signals.screen_resolution();

        // Fixed signal order; changing it silently re-identifies every
        // cookieless visitor.
        let ordered = [
            format!("{width}x{height}"),
            canvas,
            signals.color_depth().to_string(),
            signals.timezone_offset_minutes().to_string(),
            signals.language(),
            signals.platform(),
            signals.plugins().join(","),
            signals.touch_support().to_string(),
            signals.user_agent(),
            webgl,
        ];
        let digest = Sha256::digest(ordered.join("|").as_bytes());
        let mut hex = String::with_capacity(64);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        let fingerprint =
            Fingerprint::new(hex).expect("sha-256 hex digest is a valid fingerprint");
        self.cached_fingerprint = Some(fingerprint.clone());
        Ok(fingerprint)
    }

    pub fn cached_fingerprint(&self) -> Option<&Fingerprint> {
        self.cached_fingerprint.as_ref()
    }

    pub fn cached_uid(&self) -> Option<&Uid> {
        self.cached_uid.as_ref()
    }

    /// Post-consent upgrade path: flip the cookieless flag off and drop the
    /// cached `use_cookies` verdict so the next resolution re-reads the
    /// browser state.
    pub fn enable_cookies(&mut self) {
        self.cookieless = false;
        self.use_cookies_cache = None;
    }
}

fn random_hex32() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(32);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockJar, MockSignals};

    #[test]
    fn at_uid_01_generated_uid_is_32_lowercase_hex_and_round_trips() {
        let mut resolver = IdentityResolver::new("pagebeat", 30, false);
        let mut jar = MockJar::default();
        let signals = MockSignals::browser();
        let uid = resolver.uid(&mut jar, &signals);
        assert_eq!(uid.as_str().len(), 32);
        assert!(uid
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(jar.read("pagebeat_uid").as_deref(), Some(uid.as_str()));
    }

    #[test]
    fn at_uid_02_second_call_hits_the_cache_with_no_second_write() {
        let mut resolver = IdentityResolver::new("pagebeat", 30, false);
        let mut jar = MockJar::default();
        let signals = MockSignals::browser();
        let first = resolver.uid(&mut jar, &signals);
        let second = resolver.uid(&mut jar, &signals);
        assert_eq!(first, second);
        assert_eq!(jar.writes, 1);
    }

    #[test]
    fn at_uid_03_existing_cookie_is_reused_without_a_write() {
        let mut resolver = IdentityResolver::new("pagebeat", 30, false);
        let mut jar = MockJar::default();
        jar.store.insert(
            "pagebeat_uid".to_string(),
            "0123456789abcdef0123456789abcdef".to_string(),
        );
        let uid = resolver.uid(&mut jar, &MockSignals::browser());
        assert_eq!(uid.as_str(), "0123456789abcdef0123456789abcdef");
        assert_eq!(jar.writes, 0);
    }

    #[test]
    fn at_uid_04_malformed_cookie_is_replaced() {
        let mut resolver = IdentityResolver::new("pagebeat", 30, false);
        let mut jar = MockJar::default();
        jar.store
            .insert("pagebeat_uid".to_string(), "NOT-HEX".to_string());
        let uid = resolver.uid(&mut jar, &MockSignals::browser());
        assert_ne!(uid.as_str(), "NOT-HEX");
        assert_eq!(jar.writes, 1);
    }

    #[test]
    fn at_fingerprint_01_is_deterministic_for_identical_signals() {
        let mut resolver_a = IdentityResolver::new("pagebeat", 30, true);
        let mut resolver_b = IdentityResolver::new("pagebeat", 30, true);
        let signals = MockSignals::browser();
        let a = resolver_a.fingerprint(&signals).unwrap();
        let b = resolver_b.fingerprint(&signals).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn at_fingerprint_02_probe_failure_propagates() {
        let mut resolver = IdentityResolver::new("pagebeat", 30, true);
        let mut signals = MockSignals::browser();
        signals.canvas = Err(HostError::ProbeUnavailable("canvas"));
        let err = resolver.fingerprint(&signals).unwrap_err();
        assert_eq!(
            err,
            IdentityError::FingerprintProbe(HostError::ProbeUnavailable("canvas"))
        );
    }

    #[test]
    fn at_fingerprint_03_cache_survives_signal_changes() {
        let mut resolver = IdentityResolver::new("pagebeat", 30, true);
        let signals = MockSignals::browser();
        let first = resolver.fingerprint(&signals).unwrap();
        let mut changed = MockSignals::browser();
        changed.user_agent = "Mozilla/5.0 Firefox/128.0".to_string();
        let second = resolver.fingerprint(&changed).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn at_cookies_01_use_cookies_requires_both_conditions() {
        let mut cookieless = IdentityResolver::new("pagebeat", 30, true);
        assert!(!cookieless.use_cookies(&MockSignals::browser()));

        let mut blocked = IdentityResolver::new("pagebeat", 30, false);
        let mut signals = MockSignals::browser();
        signals.cookies_enabled = false;
        assert!(!blocked.use_cookies(&signals));

        let mut open = IdentityResolver::new("pagebeat", 30, false);
        assert!(open.use_cookies(&MockSignals::browser()));
    }

    #[test]
    fn at_cookies_02_enable_cookies_invalidates_the_cached_verdict() {
        let mut resolver = IdentityResolver::new("pagebeat", 30, true);
        let signals = MockSignals::browser();
        assert!(!resolver.use_cookies(&signals));
        resolver.enable_cookies();
        assert!(resolver.use_cookies(&signals));
    }
}
