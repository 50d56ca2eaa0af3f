//! Scoring formulas
//!
//! Pure functions from [`RiskSignals`] to a bounded score plus the reasons
//! that produced it. Signals that are restricted or unavailable add nothing.
//!
//! Risk (0-10):
//!
//! | Signal          | Contribution                  |
//! |-----------------|-------------------------------|
//! | blacklisted     | +10                           |
//! | account age     | +3 <7d, +2 <30d, +1 <90d      |
//! | badges          | +2 none, +1 <5                |
//! | friends         | +2 none, +1 <5                |
//! | verified badge  | -2                            |
//! | premium         | -1                            |
//!
//! Alt likelihood (0-100):
//!
//! | Signal          | Contribution                            |
//! |-----------------|-----------------------------------------|
//! | account age     | +40 <7d, +30 <30d, +20 <90d, +10 <180d  |
//! | friends         | +25 none, +15 <5, +5 <20                |
//! | badges          | +20 none, +12 <5, +5 <20                |
//! | blacklisted     | +50                                     |
//! | verified badge  | -20                                     |
//! | premium         | -15                                     |

use serde::Serialize;

use super::signals::RiskSignals;

pub const MAX_RISK: i32 = 10;
pub const MAX_ALT: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            8.. => RiskLevel::Critical,
            5..=7 => RiskLevel::High,
            3..=4 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AltConfidence {
    Minimal,
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl AltConfidence {
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => AltConfidence::VeryHigh,
            60..=79 => AltConfidence::High,
            40..=59 => AltConfidence::Moderate,
            20..=39 => AltConfidence::Low,
            _ => AltConfidence::Minimal,
        }
    }
}

/// A bounded score and the contributions behind it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scored {
    pub score: u8,
    pub reasons: Vec<String>,
}

struct Tally {
    total: i32,
    reasons: Vec<String>,
}

impl Tally {
    fn new() -> Self {
        Self { total: 0, reasons: Vec::new() }
    }

    fn add(&mut self, points: i32, reason: String) {
        if points == 0 {
            return;
        }
        self.total = self.total.saturating_add(points);
        self.reasons.push(format!("{} ({:+})", reason, points));
    }

    /// Contributions are summed in full and clamped once
    fn finish(self, max: i32) -> Scored {
        Scored {
            score: self.total.clamp(0, max) as u8,
            reasons: self.reasons,
        }
    }
}

fn blacklist_reason(signals: &RiskSignals) -> String {
    let groups = signals
        .blacklisted_groups
        .available()
        .map(|groups| {
            groups
                .iter()
                .map(|g| g.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    format!("Member of blacklisted group(s) {}", groups)
}

pub fn risk_score(signals: &RiskSignals) -> Scored {
    let mut tally = Tally::new();

    if signals.is_blacklisted() {
        tally.add(MAX_RISK, blacklist_reason(signals));
    }

    if let Some(&days) = signals.account_age_days.available() {
        let points = match days {
            ..7 => 3,
            7..30 => 2,
            30..90 => 1,
            _ => 0,
        };
        tally.add(points, format!("Account is {} days old", days));
    }

    if let Some(badges) = signals.badges.available() {
        let points = match badges.count {
            0 => 2,
            1..5 => 1,
            _ => 0,
        };
        tally.add(points, format!("{} badges", badges.count));
    }

    if let Some(&friends) = signals.friends.available() {
        let points = match friends {
            0 => 2,
            1..5 => 1,
            _ => 0,
        };
        tally.add(points, format!("{} friends", friends));
    }

    if signals.verified_badge.available() == Some(&true) {
        tally.add(-2, "Verified badge".to_string());
    }
    if signals.premium.available() == Some(&true) {
        tally.add(-1, "Premium subscriber".to_string());
    }

    tally.finish(MAX_RISK)
}

pub fn alt_score(signals: &RiskSignals) -> Scored {
    let mut tally = Tally::new();

    if let Some(&days) = signals.account_age_days.available() {
        let points = match days {
            ..7 => 40,
            7..30 => 30,
            30..90 => 20,
            90..180 => 10,
            _ => 0,
        };
        tally.add(points, format!("Account is {} days old", days));
    }

    if let Some(&friends) = signals.friends.available() {
        let points = match friends {
            0 => 25,
            1..5 => 15,
            5..20 => 5,
            _ => 0,
        };
        tally.add(points, format!("{} friends", friends));
    }

    if let Some(badges) = signals.badges.available() {
        let points = match badges.count {
            0 => 20,
            1..5 => 12,
            5..20 => 5,
            _ => 0,
        };
        tally.add(points, format!("{} badges", badges.count));
    }

    if signals.is_blacklisted() {
        tally.add(50, blacklist_reason(signals));
    }

    if signals.verified_badge.available() == Some(&true) {
        tally.add(-20, "Verified badge".to_string());
    }
    if signals.premium.available() == Some(&true) {
        tally.add(-15, "Premium subscriber".to_string());
    }

    tally.finish(MAX_ALT)
}
