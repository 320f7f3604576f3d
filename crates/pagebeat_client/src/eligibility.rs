#![forbid(unsafe_code)]

use serde_json::Value;

use crate::host::BrowserSignals;

pub const STATISTICS_CONSENT_CATEGORY: &str = "statistics";

/// Curated crawler/bot signatures, matched case-insensitively against the
/// user agent. Ordering is irrelevant; first match wins.
const BOT_SIGNATURES: [&str; 38] = [
    "googlebot",
    "bingbot",
    "bingpreview",
    "slurp",
    "duckduckbot",
    "baiduspider",
    "yandexbot",
    "sogou",
    "exabot",
    "applebot",
    "facebookexternalhit",
    "facebot",
    "ia_archiver",
    "twitterbot",
    "linkedinbot",
    "pinterestbot",
    "whatsapp",
    "telegrambot",
    "slackbot",
    "discordbot",
    "semrushbot",
    "ahrefsbot",
    "mj12bot",
    "dotbot",
    "petalbot",
    "bytespider",
    "gptbot",
    "headlesschrome",
    "phantomjs",
    "lighthouse",
    "pingdom",
    "gtmetrix",
    "uptimerobot",
    "wget",
    "curl",
    "python-requests",
    "crawler",
    "spider",
];

/// Do-Not-Track values the browser channels report when the user opted out.
const DNT_OPT_OUT_VALUES: [&str; 2] = ["1", "yes"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentState {
    /// No consent-management API on the page; tracking initializes
    /// unconditionally.
    NoApi,
    Granted,
    Denied,
}

/// Per-page-load eligibility decisions. Bot and DNT verdicts are cached for
/// the page lifetime: bots do not change mid-session, and neither does the
/// browser's privacy posture.
#[derive(Debug)]
pub struct EligibilityGate {
    respect_do_not_track: bool,
    bot_verdict: Option<bool>,
    dnt_verdict: Option<bool>,
}

impl EligibilityGate {
    pub fn new(respect_do_not_track: bool) -> Self {
        Self {
            respect_do_not_track,
            bot_verdict: None,
            dnt_verdict: None,
        }
    }

    pub fn is_bot(&mut self, signals: &dyn BrowserSignals) -> bool {
        if let Some(verdict) = self.bot_verdict {
            return verdict;
        }
        let user_agent = signals.user_agent().to_ascii_lowercase();
        let verdict = BOT_SIGNATURES
            .iter()
            .any(|signature| user_agent.contains(signature));
        self.bot_verdict = Some(verdict);
        verdict
    }

    /// True when the browser reports Do-Not-Track through any channel, or
    /// Global Privacy Control carries the literal number 1. The GPC channel
    /// is loosely typed: boolean `true` does NOT count, only the number.
    pub fn is_do_not_track(&mut self, signals: &dyn BrowserSignals) -> bool {
        if !self.respect_do_not_track {
            return false;
        }
        if let Some(verdict) = self.dnt_verdict {
            return verdict;
        }
        let dnt = signals
            .do_not_track_signals()
            .iter()
            .any(|value| DNT_OPT_OUT_VALUES.contains(&value.as_str()));
        let gpc = matches!(
            signals.global_privacy_control(),
            Some(Value::Number(n)) if n.as_f64() == Some(1.0)
        );
        let verdict = dnt || gpc;
        self.dnt_verdict = Some(verdict);
        verdict
    }

    /// Gate failure is silent; callers suppress the hit and move on.
    pub fn is_eligible(&mut self, signals: &dyn BrowserSignals) -> bool {
        !self.is_bot(signals) && !self.is_do_not_track(signals)
    }
}
