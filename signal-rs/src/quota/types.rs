use chrono::{DateTime, NaiveDate, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription plan of a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Silver,
    Gold,
}

impl Plan {
    /// Convert to database string
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Silver => "silver",
            Plan::Gold => "gold",
        }
    }

    /// Parse a plan name, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "free" => Some(Plan::Free),
            "silver" => Some(Plan::Silver),
            "gold" => Some(Plan::Gold),
            _ => None,
        }
    }

    /// Parse from database string; unknown plans read back as `free`
    pub fn from_db_string(s: &str) -> Self {
        Self::parse(s).unwrap_or(Plan::Free)
    }

    /// Daily actionable-signal quota granted by the plan
    pub fn default_quota(&self) -> Allowance {
        match self {
            Plan::Free => Allowance::Limited(1),
            Plan::Silver => Allowance::Limited(3),
            Plan::Gold => Allowance::Unlimited,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A number of quota units, or no ceiling at all.
///
/// Serialized as a plain number or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Allowance {
    Limited(u32),
    Unlimited,
}

impl Allowance {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Allowance::Unlimited)
    }

    /// Units left after `used` have been consumed
    pub fn minus(&self, used: u32) -> Allowance {
        match self {
            Allowance::Limited(cap) => Allowance::Limited(cap.saturating_sub(used)),
            Allowance::Unlimited => Allowance::Unlimited,
        }
    }

    /// Decode a stored override column: NULL is absent, negative is unlimited
    pub fn from_db(value: Option<i64>) -> Option<Allowance> {
        value.map(|v| {
            if v < 0 {
                Allowance::Unlimited
            } else {
                Allowance::Limited(u32::try_from(v).unwrap_or(u32::MAX))
            }
        })
    }

    /// Encode for the override column
    pub fn to_db(value: Option<Allowance>) -> Option<i64> {
        value.map(|a| match a {
            Allowance::Limited(n) => i64::from(n),
            Allowance::Unlimited => -1,
        })
    }
}

impl fmt::Display for Allowance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Allowance::Limited(n) => write!(f, "{}", n),
            Allowance::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl FromStr for Allowance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(Allowance::Unlimited);
        }
        s.parse::<u32>()
            .map(Allowance::Limited)
            .map_err(|_| format!("invalid allowance: {}", s))
    }
}

impl Serialize for Allowance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Allowance::Limited(n) => serializer.serialize_u32(*n),
            Allowance::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AllowanceRepr {
    Count(u32),
    Word(String),
}

impl<'de> Deserialize<'de> for Allowance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match AllowanceRepr::deserialize(deserializer)? {
            AllowanceRepr::Count(n) => Ok(Allowance::Limited(n)),
            AllowanceRepr::Word(word) => word.parse().map_err(de::Error::custom),
        }
    }
}

/// Effective daily quota.
///
/// An override always wins, including `Limited(0)` which blocks the identity.
/// Without one, the plan default applies, raised by an active boost.
pub fn effective_quota(plan: Plan, quota_override: Option<Allowance>, boost: Option<Plan>) -> Allowance {
    if let Some(quota) = quota_override {
        return quota;
    }

    let base = plan.default_quota();
    match boost.map(|p| p.default_quota()) {
        Some(Allowance::Unlimited) => Allowance::Unlimited,
        Some(Allowance::Limited(boosted)) => match base {
            Allowance::Limited(n) => Allowance::Limited(n.max(boosted)),
            Allowance::Unlimited => Allowance::Unlimited,
        },
        None => base,
    }
}

/// The UTC calendar day `now` falls on
pub fn utc_day(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

/// Storage key for the UTC day containing `now`
pub fn day_key(now: DateTime<Utc>) -> String {
    utc_day(now).format("%Y-%m-%d").to_string()
}

/// Quota metadata returned to clients alongside every fetch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaSnapshot {
    pub plan: Plan,
    pub daily_quota: Allowance,
    pub used_today: u32,
    pub remaining: Allowance,
}

/// Temporary plan upgrade granted through a referral
#[derive(Debug, Clone, Serialize)]
pub struct ReferralBoost {
    pub id: i64,
    pub identity_id: i64,
    pub boost_to: Plan,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub is_revoked: bool,
}
