use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Result, SignalError};

/// Fixed vocabulary of signal actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    Buy,
    Sell,
    AdjustSl,
    AdjustTp,
    Close,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::AdjustSl => "adjust_sl",
            SignalAction::AdjustTp => "adjust_tp",
            SignalAction::Close => "close",
            SignalAction::Hold => "hold",
        }
    }

    /// Parse an action name, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Some(SignalAction::Buy),
            "sell" => Some(SignalAction::Sell),
            "adjust_sl" => Some(SignalAction::AdjustSl),
            "adjust_tp" => Some(SignalAction::AdjustTp),
            "close" => Some(SignalAction::Close),
            "hold" => Some(SignalAction::Hold),
            _ => None,
        }
    }

    /// Opening actions cost one quota unit on first delivery
    pub fn is_actionable(&self) -> bool {
        matches!(self, SignalAction::Buy | SignalAction::Sell)
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published, immutable signal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub id: i64,
    pub sender_id: i64,
    pub symbol: String,
    pub action: SignalAction,
    pub sl_pips: f64,
    pub tp_pips: f64,
    pub lot_size: f64,
    /// Free-form payload, passed through untouched
    pub details: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn is_actionable(&self) -> bool {
        self.action.is_actionable()
    }
}

fn default_pips() -> f64 {
    1.0
}

fn default_lot_size() -> f64 {
    0.01
}

/// Publish payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewSignal {
    pub symbol: String,
    pub action: String,
    #[serde(default = "default_pips")]
    pub sl_pips: f64,
    #[serde(default = "default_pips")]
    pub tp_pips: f64,
    #[serde(default = "default_lot_size")]
    pub lot_size: f64,
    #[serde(default)]
    pub details: Option<Map<String, Value>>,
}

impl NewSignal {
    pub fn new(symbol: &str, action: SignalAction) -> Self {
        Self {
            symbol: symbol.to_string(),
            action: action.as_str().to_string(),
            sl_pips: default_pips(),
            tp_pips: default_pips(),
            lot_size: default_lot_size(),
            details: None,
        }
    }

    /// Normalized symbol and parsed action
    pub fn validate(&self) -> Result<(String, SignalAction)> {
        let symbol = self.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(SignalError::InvalidRequest("symbol_required".to_string()));
        }

        let action = SignalAction::parse(&self.action)
            .ok_or_else(|| SignalError::InvalidRequest("unsupported_action".to_string()))?;

        if !self.lot_size.is_finite() || self.lot_size <= 0.0 {
            return Err(SignalError::InvalidRequest("invalid_lot_size".to_string()));
        }
        if !self.sl_pips.is_finite()
            || !self.tp_pips.is_finite()
            || self.sl_pips < 0.0
            || self.tp_pips < 0.0
        {
            return Err(SignalError::InvalidRequest("invalid_pips".to_string()));
        }

        Ok((symbol, action))
    }
}

/// Bounds on the candidate scan for one fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    /// Oldest `created_at` still eligible
    pub since: DateTime<Utc>,
    pub max_candidates: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_classification() {
        assert!(SignalAction::Buy.is_actionable());
        assert!(SignalAction::Sell.is_actionable());
        for action in [
            SignalAction::AdjustSl,
            SignalAction::AdjustTp,
            SignalAction::Close,
            SignalAction::Hold,
        ] {
            assert!(!action.is_actionable(), "{} should not be actionable", action);
        }
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(SignalAction::parse(" BUY "), Some(SignalAction::Buy));
        assert_eq!(SignalAction::parse("adjust_tp"), Some(SignalAction::AdjustTp));
        assert_eq!(SignalAction::parse("short"), None);
    }

    #[test]
    fn test_new_signal_defaults() {
        let new: NewSignal = serde_json::from_str(r#"{"symbol":"eurusd","action":"buy"}"#).unwrap();
        assert_eq!(new.sl_pips, 1.0);
        assert_eq!(new.tp_pips, 1.0);
        assert_eq!(new.lot_size, 0.01);
        assert!(new.details.is_none());
    }

    #[test]
    fn test_validate_normalizes_symbol() {
        let new = NewSignal::new("  xauusd ", SignalAction::Sell);
        assert_eq!(
            new.validate().unwrap(),
            ("XAUUSD".to_string(), SignalAction::Sell)
        );
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let mut new = NewSignal::new("EURUSD", SignalAction::Buy);
        new.action = "moon".to_string();
        assert!(matches!(new.validate(), Err(SignalError::InvalidRequest(ref c)) if c == "unsupported_action"));

        let new = NewSignal::new("  ", SignalAction::Buy);
        assert!(matches!(new.validate(), Err(SignalError::InvalidRequest(ref c)) if c == "symbol_required"));

        let mut new = NewSignal::new("EURUSD", SignalAction::Buy);
        new.lot_size = 0.0;
        assert!(matches!(new.validate(), Err(SignalError::InvalidRequest(ref c)) if c == "invalid_lot_size"));
    }
}
