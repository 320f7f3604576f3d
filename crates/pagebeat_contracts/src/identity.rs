#![forbid(unsafe_code)]

use crate::common::{validate_hex32, validate_text};
use crate::{ContractViolation, Validate};

/// Persistent cookie-backed visitor token: 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(String);

impl Uid {
    pub fn new(value: impl Into<String>) -> Result<Self, ContractViolation> {
        let uid = Self(value.into());
        uid.validate()?;
        Ok(uid)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for Uid {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_hex32("uid", &self.0)
    }
}

/// Derived device/browser identifier. Statistically distinguishing, not
/// guaranteed globally unique.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Result<Self, ContractViolation> {
        let fingerprint = Self(value.into());
        fingerprint.validate()?;
        Ok(fingerprint)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for Fingerprint {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("fingerprint", &self.0, 128)
    }
}

/// The active identity for one page view. Exactly one of uid/fingerprint in
/// the common case; `Upgrade` is the sole shape carrying both, sent when a
/// visitor grants cookie consent mid-session so the server can merge
/// fingerprint-keyed history into the persistent uid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisitorIdentity {
    Uid(Uid),
    Fingerprint(Fingerprint),
    Upgrade { uid: Uid, fingerprint: Fingerprint },
}

impl VisitorIdentity {
    pub fn uid(&self) -> Option<&str> {
        match self {
            VisitorIdentity::Uid(uid) => Some(uid.as_str()),
            VisitorIdentity::Fingerprint(_) => None,
            VisitorIdentity::Upgrade { uid, .. } => Some(uid.as_str()),
        }
    }

    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            VisitorIdentity::Uid(_) => None,
            VisitorIdentity::Fingerprint(fingerprint) => Some(fingerprint.as_str()),
            VisitorIdentity::Upgrade { fingerprint, .. } => Some(fingerprint.as_str()),
        }
    }

    pub fn is_upgrade(&self) -> bool {
        matches!(self, VisitorIdentity::Upgrade { .. })
    }
}

impl Validate for VisitorIdentity {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            VisitorIdentity::Uid(uid) => uid.validate(),
            VisitorIdentity::Fingerprint(fingerprint) => fingerprint.validate(),
            VisitorIdentity::Upgrade { uid, fingerprint } => {
                uid.validate()?;
                fingerprint.validate()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_identity_01_uid_requires_lowercase_hex32() {
        assert!(Uid::new("0123456789abcdef0123456789abcdef").is_ok());
        assert!(Uid::new("0123456789ABCDEF0123456789ABCDEF").is_err());
        assert!(Uid::new("0123456789abcdef").is_err());
        assert!(Uid::new("g123456789abcdef0123456789abcdef").is_err());
    }

    #[test]
    fn at_identity_02_upgrade_exposes_both_sides() {
        let uid = Uid::new("0123456789abcdef0123456789abcdef").unwrap();
        let fingerprint = Fingerprint::new("fp_device_a").unwrap();
        let identity = VisitorIdentity::Upgrade { uid, fingerprint };
        assert_eq!(identity.uid(), Some("0123456789abcdef0123456789abcdef"));
        assert_eq!(identity.fingerprint(), Some("fp_device_a"));
        assert!(identity.is_upgrade());
    }

    #[test]
    fn at_identity_03_plain_variants_expose_one_side_only() {
        let uid = VisitorIdentity::Uid(Uid::new("0123456789abcdef0123456789abcdef").unwrap());
        assert!(uid.fingerprint().is_none());
        let fingerprint = VisitorIdentity::Fingerprint(Fingerprint::new("fp_device_a").unwrap());
        assert!(fingerprint.uid().is_none());
    }
}
