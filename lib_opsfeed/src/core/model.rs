//! # Cached Domain Model
//!
//! The records the state cache holds: per-hospital operational state, the
//! global external context, transfer events, and the connection status the
//! dashboard shows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state as the dashboard sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No session, or reconnection exhausted.
    #[default]
    Disconnected,
    /// A session is being opened.
    Connecting,
    /// A session is open and delivering messages.
    Connected,
    /// The last session ended with a transport error.
    Error,
}

/// Latest known operational state of one hospital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HospitalState {
    /// Occupied beds.
    pub occupied_beds: u32,
    /// Bed capacity, when the source reports it.
    pub total_beds: Option<u32>,
    /// Patients waiting in the emergency queue.
    pub queue_length: u32,
    /// Normalized load in [0, 1].
    pub saturation: f64,
    /// Emergency mode flag.
    pub emergency: bool,
    /// When the source produced this state (or when it was applied, if unstamped).
    pub updated_at: DateTime<Utc>,
}

impl HospitalState {
    /// Restores the saturation invariant. NaN becomes 0.
    pub fn normalized(mut self) -> Self {
        self.saturation = clamp_unit(self.saturation);
        self
    }
}

/// Clamps a ratio into [0, 1]; NaN maps to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Global environmental context shared by every hospital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalContext {
    /// Outside temperature in degrees Celsius.
    pub temperature: Option<f64>,
    /// Free-form weather condition ("rain", "heatwave", ...).
    pub weather: Option<String>,
    /// Multiplier for expected load from public events, never negative.
    pub event_load: f64,
    /// Public holiday flag.
    pub holiday: bool,
    /// Last time any field changed.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ExternalContext {
    fn default() -> Self {
        Self {
            temperature: None,
            weather: None,
            event_load: 1.0,
            holiday: false,
            updated_at: None,
        }
    }
}

/// A partial context update: only the present fields overwrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPatch {
    /// New temperature, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// New weather condition, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,
    /// New event-load multiplier, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_load: Option<f64>,
    /// New holiday flag, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holiday: Option<bool>,
}

impl ContextPatch {
    /// True when the patch carries no field at all.
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.weather.is_none()
            && self.event_load.is_none()
            && self.holiday.is_none()
    }
}

impl ExternalContext {
    /// Merges by field presence. Returns whether anything was present.
    pub fn apply(&mut self, patch: ContextPatch, at: DateTime<Utc>) -> bool {
        if patch.is_empty() {
            return false;
        }
        if let Some(t) = patch.temperature {
            self.temperature = Some(t);
        }
        if let Some(w) = patch.weather {
            self.weather = Some(w);
        }
        if let Some(load) = patch.event_load {
            self.event_load = if load.is_nan() { 0.0 } else { load.max(0.0) };
        }
        if let Some(h) = patch.holiday {
            self.holiday = h;
        }
        self.updated_at = Some(at);
        true
    }
}

/// Urgency tier of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyTier {
    /// Source sent no tier, or one we do not know.
    Unspecified,
    /// Routine transfer.
    Low,
    /// Should be handled soon.
    Medium,
    /// Needs attention now.
    High,
    /// Life-threatening.
    Critical,
}

impl UrgencyTier {
    /// Lenient parse: case-insensitive names, common synonyms, or tiers 1-4.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "routine" | "1" => UrgencyTier::Low,
            "medium" | "moderate" | "2" => UrgencyTier::Medium,
            "high" | "urgent" | "3" => UrgencyTier::High,
            "critical" | "emergency" | "4" => UrgencyTier::Critical,
            _ => UrgencyTier::Unspecified,
        }
    }

    /// Stable lowercase label, also used in fallback identity keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyTier::Unspecified => "unspecified",
            UrgencyTier::Low => "low",
            UrgencyTier::Medium => "medium",
            UrgencyTier::High => "high",
            UrgencyTier::Critical => "critical",
        }
    }
}

/// A patient transfer (derivation) or alert. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Stable identity: the source id, or the derived fallback key.
    pub id: String,
    /// Sending hospital (or alert source).
    pub origin: String,
    /// Receiving hospital.
    pub destination: String,
    /// Clinical or operational reason.
    pub reason: String,
    /// Urgency tier.
    pub urgency: UrgencyTier,
    /// When the transfer was issued.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_unit_bounds() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(0.35), 0.35);
    }

    #[test]
    fn test_context_patch_merges_by_presence() {
        let now = Utc::now();
        let mut ctx = ExternalContext::default();
        ctx.apply(
            ContextPatch {
                temperature: Some(31.5),
                weather: Some("heatwave".into()),
                ..ContextPatch::default()
            },
            now,
        );
        ctx.apply(
            ContextPatch {
                holiday: Some(true),
                event_load: Some(-3.0),
                ..ContextPatch::default()
            },
            now,
        );
        assert_eq!(ctx.temperature, Some(31.5));
        assert_eq!(ctx.weather.as_deref(), Some("heatwave"));
        assert!(ctx.holiday);
        assert_eq!(ctx.event_load, 0.0);
    }

    #[test]
    fn test_empty_patch_changes_nothing() {
        let mut ctx = ExternalContext::default();
        assert!(!ctx.apply(ContextPatch::default(), Utc::now()));
        assert_eq!(ctx, ExternalContext::default());
    }

    #[test]
    fn test_urgency_parse_is_lenient() {
        assert_eq!(UrgencyTier::parse("CRITICAL"), UrgencyTier::Critical);
        assert_eq!(UrgencyTier::parse(" urgent "), UrgencyTier::High);
        assert_eq!(UrgencyTier::parse("2"), UrgencyTier::Medium);
        assert_eq!(UrgencyTier::parse("whenever"), UrgencyTier::Unspecified);
    }
}
