#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::{validate_hex32, validate_text};
use crate::identity::VisitorIdentity;
use crate::{ContractViolation, Validate};

pub const MAX_URL_LEN: usize = 2_048;
pub const MAX_COMPLETED_GOALS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HitKind {
    Initial,
    Update,
}

impl HitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HitKind::Initial => "INITIAL",
            HitKind::Update => "UPDATE",
        }
    }
}

/// One tracking event on the wire. Initial hits carry the full page context;
/// update hits carry only elapsed time, goals and identity. `uid` and
/// `fingerprint` serialize as the string value or the JSON literal `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitPayload {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_resolution: Option<String>,
    pub time_on_page: u64,
    pub completed_goals: Vec<u32>,
    #[serde(with = "string_or_false")]
    pub uid: Option<String>,
    #[serde(with = "string_or_false")]
    pub fingerprint: Option<String>,
}

impl HitPayload {
    #[allow(clippy::too_many_arguments)]
    pub fn initial(
        url: String,
        referrer_url: Option<String>,
        user_agent: String,
        device_resolution: String,
        time_on_page: u64,
        completed_goals: Vec<u32>,
        identity: &VisitorIdentity,
    ) -> Result<Self, ContractViolation> {
        let hit = Self {
            url,
            referrer_url,
            user_agent: Some(user_agent),
            device_resolution: Some(device_resolution),
            time_on_page,
            completed_goals,
            uid: identity.uid().map(str::to_string),
            fingerprint: identity.fingerprint().map(str::to_string),
        };
        hit.validate()?;
        Ok(hit)
    }

    pub fn update(
        url: String,
        time_on_page: u64,
        completed_goals: Vec<u32>,
        identity: &VisitorIdentity,
    ) -> Result<Self, ContractViolation> {
        let hit = Self {
            url,
            referrer_url: None,
            user_agent: None,
            device_resolution: None,
            time_on_page,
            completed_goals,
            uid: identity.uid().map(str::to_string),
            fingerprint: identity.fingerprint().map(str::to_string),
        };
        hit.validate()?;
        Ok(hit)
    }

    pub fn has_identity(&self) -> bool {
        self.uid.is_some() || self.fingerprint.is_some()
    }

    /// A zero-time hit without identity carries no information and must
    /// never reach the wire.
    pub fn carries_information(&self) -> bool {
        self.time_on_page > 0 || self.has_identity()
    }

    /// The server never receives an explicit kind marker; initial hits are
    /// the ones that carry the page context.
    pub fn inferred_kind(&self) -> HitKind {
        if self.user_agent.is_some() {
            HitKind::Initial
        } else {
            HitKind::Update
        }
    }
}

impl Validate for HitPayload {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("hit.url", &self.url, MAX_URL_LEN)?;
        if let Some(referrer_url) = &self.referrer_url {
            if !referrer_url.is_empty() && referrer_url.len() > MAX_URL_LEN {
                return Err(ContractViolation::InvalidValue {
                    field: "hit.referrer_url",
                    reason: "exceeds maximum length",
                });
            }
        }
        if let Some(user_agent) = &self.user_agent {
            validate_text("hit.user_agent", user_agent, 512)?;
        }
        if let Some(device_resolution) = &self.device_resolution {
            validate_device_resolution(device_resolution)?;
        }
        if self.completed_goals.len() > MAX_COMPLETED_GOALS {
            return Err(ContractViolation::InvalidValue {
                field: "hit.completed_goals",
                reason: "exceeds maximum entries",
            });
        }
        if let Some(uid) = &self.uid {
            validate_hex32("hit.uid", uid)?;
        }
        if let Some(fingerprint) = &self.fingerprint {
            validate_text("hit.fingerprint", fingerprint, 128)?;
        }
        if !self.carries_information() {
            return Err(ContractViolation::InvalidValue {
                field: "hit",
                reason: "zero time_on_page with no identity carries no information",
            });
        }
        Ok(())
    }
}

fn validate_device_resolution(value: &str) -> Result<(), ContractViolation> {
    let mut parts = value.splitn(2, 'x');
    let width = parts.next().unwrap_or("");
    let height = parts.next().unwrap_or("");
    if width.parse::<u32>().is_err() || height.parse::<u32>().is_err() {
        return Err(ContractViolation::InvalidValue {
            field: "hit.device_resolution",
            reason: "must be <width>x<height>",
        });
    }
    Ok(())
}

/// Wire shape for identity fields: the string value, or the literal `false`
/// when the field is intentionally absent. `true` is never valid.
mod string_or_false {
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(text) => serializer.serialize_str(text),
            None => serializer.serialize_bool(false),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Text(String),
            Flag(bool),
        }
        match Wire::deserialize(deserializer)? {
            Wire::Text(text) => Ok(Some(text)),
            Wire::Flag(false) => Ok(None),
            Wire::Flag(true) => Err(D::Error::custom("identity field must be a string or false")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Fingerprint, Uid, VisitorIdentity};

    fn uid_identity() -> VisitorIdentity {
        VisitorIdentity::Uid(Uid::new("0123456789abcdef0123456789abcdef").unwrap())
    }

    #[test]
    fn at_hit_01_identity_fields_serialize_as_string_or_false() {
        let hit = HitPayload::initial(
            "https://shop.example/landing".to_string(),
            Some("https://search.example".to_string()),
            "Mozilla/5.0".to_string(),
            "1920x1080".to_string(),
            1_200,
            vec![3],
            &uid_identity(),
        )
        .unwrap();
        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(
            json["uid"],
            serde_json::json!("0123456789abcdef0123456789abcdef")
        );
        assert_eq!(json["fingerprint"], serde_json::json!(false));
    }

    #[test]
    fn at_hit_02_wire_round_trip_preserves_absent_identity() {
        let raw = r#"{
            "url": "https://shop.example/landing",
            "time_on_page": 450,
            "completed_goals": [],
            "uid": false,
            "fingerprint": "fp_device_a"
        }"#;
        let hit: HitPayload = serde_json::from_str(raw).unwrap();
        assert!(hit.uid.is_none());
        assert_eq!(hit.fingerprint.as_deref(), Some("fp_device_a"));
        assert_eq!(hit.inferred_kind(), HitKind::Update);
    }

    #[test]
    fn at_hit_03_true_is_rejected_for_identity_fields() {
        let raw = r#"{
            "url": "https://shop.example/landing",
            "time_on_page": 450,
            "completed_goals": [],
            "uid": true,
            "fingerprint": false
        }"#;
        assert!(serde_json::from_str::<HitPayload>(raw).is_err());
    }

    #[test]
    fn at_hit_04_empty_update_fails_validation() {
        let hit = HitPayload {
            url: "https://shop.example/landing".to_string(),
            referrer_url: None,
            user_agent: None,
            device_resolution: None,
            time_on_page: 0,
            completed_goals: Vec::new(),
            uid: None,
            fingerprint: None,
        };
        assert!(hit.validate().is_err());
    }

    #[test]
    fn at_hit_05_upgrade_hit_carries_both_identity_fields() {
        let identity = VisitorIdentity::Upgrade {
            uid: Uid::new("0123456789abcdef0123456789abcdef").unwrap(),
            fingerprint: Fingerprint::new("fp_device_a").unwrap(),
        };
        let hit = HitPayload::update(
            "https://shop.example/landing".to_string(),
            900,
            Vec::new(),
            &identity,
        )
        .unwrap();
        assert!(hit.uid.is_some());
        assert!(hit.fingerprint.is_some());
    }

    #[test]
    fn at_hit_06_device_resolution_must_be_w_x_h() {
        let mut hit = HitPayload::initial(
            "https://shop.example/landing".to_string(),
            None,
            "Mozilla/5.0".to_string(),
            "1920x1080".to_string(),
            100,
            Vec::new(),
            &uid_identity(),
        )
        .unwrap();
        hit.device_resolution = Some("wide".to_string());
        assert!(hit.validate().is_err());
    }
}
