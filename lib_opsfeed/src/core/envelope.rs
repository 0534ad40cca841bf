//! # Message Envelope Decoder
//!
//! Turns raw frames into typed [`Envelope`]s. Socket frames carry a
//! `{ "type": <tag>, "data": <payload> }` wrapper; broker frames carry a bare
//! payload and the topic decides the kind.
//!
//! Decoding never panics. Malformed input yields a [`DecodeError`] that the
//! dispatcher logs and drops. Unknown tags decode to [`Envelope::Unknown`] so
//! newer producers never break older clients.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::model::{clamp_unit, ContextPatch, HospitalState, TransferEvent, UrgencyTier};
use crate::core::topics::{self, TopicCategory};
use crate::core::transport::InboundFrame;

/// Full status snapshot: hospitals, context and optionally transfers.
pub const KIND_FULL_STATE: &str = "full_state";
/// Single hospital metric update.
pub const KIND_HOSPITAL_UPDATE: &str = "hospital_update";
/// Context update (merge by field presence).
pub const KIND_CONTEXT_UPDATE: &str = "context_update";
/// One or more transfer (derivation) events.
pub const KIND_TRANSFER: &str = "transfer";
/// One or more alerts, recorded like transfers.
pub const KIND_ALERT: &str = "alert";

/// Reasons a frame could not become an envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not JSON, or not a JSON object.
    #[error("frame is not a JSON object: {0}")]
    Json(#[from] serde_json::Error),
    /// The wrapper lacks its `type` tag.
    #[error("envelope carries no `type` tag")]
    MissingKind,
    /// The payload does not fit the schema of its kind.
    #[error("`{kind}` payload does not match its schema: {reason}")]
    Schema {
        /// Envelope kind or topic category.
        kind: String,
        /// What was wrong.
        reason: String,
    },
    /// A broker topic outside every subscribed category.
    #[error("topic `{0}` matches no subscription")]
    UnroutedTopic(String),
}

impl DecodeError {
    fn schema(kind: &str, reason: impl ToString) -> Self {
        DecodeError::Schema {
            kind: kind.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A decoded message, consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Full status snapshot, fanned out into independent cache writes.
    Snapshot(StatusSnapshot),
    /// Continuous metric update for one hospital. Fields the update leaves
    /// out keep their cached values; see [`HospitalPayload::merge_into`].
    HospitalUpdate(HospitalUpdate),
    /// Context record, merged by field presence.
    Context(ContextPatch),
    /// Discrete events that go through deduplication.
    Transfers(Vec<TransferPayload>),
    /// A kind this client does not know. Ignored.
    Unknown(String),
}

impl Envelope {
    /// Label used in logs and statistics.
    pub fn kind(&self) -> &str {
        match self {
            Envelope::Snapshot(_) => KIND_FULL_STATE,
            Envelope::HospitalUpdate(_) => KIND_HOSPITAL_UPDATE,
            Envelope::Context(_) => KIND_CONTEXT_UPDATE,
            Envelope::Transfers(_) => KIND_TRANSFER,
            Envelope::Unknown(kind) => kind,
        }
    }
}

/// Decoded full-status snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    /// Valid hospital entries, in payload order.
    pub hospitals: Vec<(String, HospitalPayload)>,
    /// Ids of hospital entries that failed validation and were skipped.
    pub rejected_hospitals: Vec<String>,
    /// Top-level sections (`hospitals`, `context`, `transfers`) that were
    /// malformed as a whole and skipped. The other sections still apply.
    pub rejected_sections: Vec<&'static str>,
    /// Context record, if the snapshot carried one.
    pub context: Option<ContextPatch>,
    /// Transfer events embedded in the snapshot.
    pub transfers: Vec<TransferPayload>,
}

/// Metric update addressed to one hospital.
#[derive(Debug, Clone, PartialEq)]
pub struct HospitalUpdate {
    /// Hospital identifier.
    pub hospital_id: String,
    /// Reported metrics.
    pub payload: HospitalPayload,
}

/// Hospital metrics as they travel on the wire. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HospitalPayload {
    /// Occupied beds.
    #[serde(default, alias = "occupancy", deserialize_with = "de_count")]
    pub occupied_beds: Option<u32>,
    /// Bed capacity.
    #[serde(default, alias = "capacity", deserialize_with = "de_count")]
    pub total_beds: Option<u32>,
    /// Emergency queue length.
    #[serde(default, alias = "queue", deserialize_with = "de_count")]
    pub queue_length: Option<u32>,
    /// Load ratio; clamped when turned into state.
    #[serde(default, alias = "saturation_ratio")]
    pub saturation: Option<f64>,
    /// Emergency mode flag.
    #[serde(default, alias = "emergency_mode")]
    pub emergency: Option<bool>,
    /// Source timestamp. Unreadable values count as absent.
    #[serde(default, alias = "last_update", deserialize_with = "de_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl HospitalPayload {
    /// Builds the cached state. Saturation is taken as reported (clamped) or
    /// derived from occupancy over capacity.
    pub fn into_state(self, received_at: DateTime<Utc>) -> HospitalState {
        let occupied = self.occupied_beds.unwrap_or(0);
        let saturation = match (self.saturation, self.total_beds) {
            (Some(s), _) => s,
            (None, Some(total)) if total > 0 => f64::from(occupied) / f64::from(total),
            _ => 0.0,
        };
        HospitalState {
            occupied_beds: occupied,
            total_beds: self.total_beds,
            queue_length: self.queue_length.unwrap_or(0),
            saturation: clamp_unit(saturation),
            emergency: self.emergency.unwrap_or(false),
            updated_at: self.updated_at.unwrap_or(received_at),
        }
    }

    /// Applies a partial report on top of the cached state. Absent fields keep
    /// their previous values. Saturation is re-derived only when the report
    /// carries occupancy or capacity without a saturation of its own.
    pub fn merge_into(self, previous: &HospitalState, received_at: DateTime<Utc>) -> HospitalState {
        let occupied = self.occupied_beds.unwrap_or(previous.occupied_beds);
        let total = self.total_beds.or(previous.total_beds);
        let reports_beds = self.occupied_beds.is_some() || self.total_beds.is_some();
        let saturation = match (self.saturation, total) {
            (Some(s), _) => s,
            (None, Some(total)) if reports_beds && total > 0 => {
                f64::from(occupied) / f64::from(total)
            }
            _ => previous.saturation,
        };
        HospitalState {
            occupied_beds: occupied,
            total_beds: total,
            queue_length: self.queue_length.unwrap_or(previous.queue_length),
            saturation: clamp_unit(saturation),
            emergency: self.emergency.unwrap_or(previous.emergency),
            updated_at: self.updated_at.unwrap_or(received_at),
        }
    }
}

/// Transfer or alert as it travels on the wire.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransferPayload {
    /// Stable source identifier.
    #[serde(default, alias = "event_id", deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    /// Sending hospital.
    #[serde(default, alias = "from", alias = "hospital_id")]
    pub origin: Option<String>,
    /// Receiving hospital.
    #[serde(default, alias = "to")]
    pub destination: Option<String>,
    /// Reason for the transfer.
    #[serde(default, alias = "message")]
    pub reason: Option<String>,
    /// Urgency tier, by name or 1-4.
    #[serde(default, alias = "priority", deserialize_with = "de_urgency")]
    pub urgency: Option<UrgencyTier>,
    /// Issue time. Unreadable values count as absent.
    #[serde(default, alias = "created_at", deserialize_with = "de_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TransferPayload {
    /// Identity key for deduplication: the source id when present, otherwise a
    /// composite of the remaining fields. Deterministic for a given payload.
    pub fn identity_key(&self) -> String {
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            return id.to_string();
        }
        let timestamp = self
            .timestamp
            .map(|t| t.timestamp_millis().to_string())
            .unwrap_or_default();
        format!(
            "{}|{}|{}|{}|{}",
            self.origin.as_deref().unwrap_or(""),
            self.destination.as_deref().unwrap_or(""),
            self.reason.as_deref().unwrap_or(""),
            self.urgency.unwrap_or(UrgencyTier::Unspecified).as_str(),
            timestamp
        )
    }

    /// Freezes the payload into a cached event under the given identity.
    pub fn into_event(self, id: String, received_at: DateTime<Utc>) -> TransferEvent {
        TransferEvent {
            id,
            origin: self.origin.unwrap_or_default(),
            destination: self.destination.unwrap_or_default(),
            reason: self.reason.unwrap_or_default(),
            urgency: self.urgency.unwrap_or(UrgencyTier::Unspecified),
            timestamp: self.timestamp.unwrap_or(received_at),
        }
    }

    fn is_identifiable(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.is_empty())
            || self.origin.is_some()
            || self.destination.is_some()
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default, alias = "payload")]
    data: Value,
}

/// Decodes a frame from any transport. Broker frames route by topic.
pub fn decode_frame(frame: &InboundFrame) -> Result<Envelope, DecodeError> {
    match frame.topic.as_deref() {
        Some(topic) => decode_topic(topic, &frame.text),
        None => decode(&frame.text),
    }
}

/// Decodes a `{ "type", "data" }` wrapper.
pub fn decode(text: &str) -> Result<Envelope, DecodeError> {
    let raw: RawEnvelope = serde_json::from_str(text)?;
    let kind = raw.kind.ok_or(DecodeError::MissingKind)?;
    match kind.as_str() {
        KIND_FULL_STATE => decode_snapshot(raw.data).map(Envelope::Snapshot),
        KIND_HOSPITAL_UPDATE => decode_hospital_update(&kind, raw.data, None),
        KIND_CONTEXT_UPDATE => decode_context(&kind, raw.data).map(Envelope::Context),
        KIND_TRANSFER | KIND_ALERT => decode_transfers(&kind, raw.data, None),
        _ => Ok(Envelope::Unknown(kind)),
    }
}

/// Decodes a bare broker payload published on `topic`.
pub fn decode_topic(topic: &str, text: &str) -> Result<Envelope, DecodeError> {
    let category =
        topics::classify(topic).ok_or_else(|| DecodeError::UnroutedTopic(topic.to_string()))?;
    let data: Value = serde_json::from_str(text)?;
    let kind = category.label();
    match category {
        TopicCategory::HospitalMetrics => {
            decode_hospital_update(kind, data, topics::hospital_segment(topic))
        }
        TopicCategory::HospitalAlerts => {
            decode_transfers(kind, data, topics::hospital_segment(topic))
        }
        TopicCategory::PredictionAlerts => decode_transfers(kind, data, Some("prediction")),
        TopicCategory::Arrivals => match data.get("context") {
            Some(ctx) => decode_context(kind, ctx.clone()).map(Envelope::Context),
            None => Ok(Envelope::Unknown(kind.to_string())),
        },
    }
}

fn decode_snapshot(data: Value) -> Result<StatusSnapshot, DecodeError> {
    let mut obj = into_object(KIND_FULL_STATE, data)?;
    let mut snapshot = StatusSnapshot::default();

    match obj.remove("hospitals") {
        Some(Value::Object(map)) => {
            for (id, entry) in map {
                push_hospital(&mut snapshot, id, entry);
            }
        }
        Some(Value::Array(list)) => {
            for entry in list {
                let id = entry
                    .get("hospital_id")
                    .or_else(|| entry.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match id {
                    Some(id) => push_hospital(&mut snapshot, id, entry),
                    None => snapshot.rejected_hospitals.push(String::new()),
                }
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => {
            tracing::warn!(got = json_type(&other), "Skipping snapshot hospitals: expected a map");
            snapshot.rejected_sections.push("hospitals");
        }
    }

    if let Some(ctx) = obj.remove("context").filter(|v| !v.is_null()) {
        match decode_context(KIND_FULL_STATE, ctx) {
            Ok(patch) => snapshot.context = Some(patch),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping invalid snapshot context");
                snapshot.rejected_sections.push("context");
            }
        }
    }

    let transfers = obj
        .remove("transfers")
        .or_else(|| obj.remove("derivations"))
        .filter(|v| !v.is_null());
    match transfers {
        Some(Value::Array(items)) => {
            snapshot.transfers = collect_transfers(KIND_FULL_STATE, items, None);
        }
        Some(other) => {
            tracing::warn!(got = json_type(&other), "Skipping snapshot transfers: expected a list");
            snapshot.rejected_sections.push("transfers");
        }
        None => {}
    }

    Ok(snapshot)
}

fn push_hospital(snapshot: &mut StatusSnapshot, id: String, entry: Value) {
    match serde_json::from_value::<HospitalPayload>(entry) {
        Ok(payload) if !id.is_empty() => snapshot.hospitals.push((id, payload)),
        Ok(_) => snapshot.rejected_hospitals.push(id),
        Err(e) => {
            tracing::warn!(hospital = %id, error = %e, "Skipping invalid hospital entry in snapshot");
            snapshot.rejected_hospitals.push(id);
        }
    }
}

fn decode_hospital_update(
    kind: &str,
    data: Value,
    topic_hospital: Option<&str>,
) -> Result<Envelope, DecodeError> {
    let obj = into_object(kind, data)?;
    let hospital_id = obj
        .get("hospital_id")
        .or_else(|| obj.get("id"))
        .and_then(Value::as_str)
        .or(topic_hospital)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DecodeError::schema(kind, "missing `hospital_id`"))?;
    let payload = serde_json::from_value::<HospitalPayload>(Value::Object(obj))
        .map_err(|e| DecodeError::schema(kind, e))?;
    Ok(Envelope::HospitalUpdate(HospitalUpdate {
        hospital_id,
        payload,
    }))
}

fn decode_context(kind: &str, data: Value) -> Result<ContextPatch, DecodeError> {
    let obj = into_object(kind, data)?;
    serde_json::from_value(Value::Object(obj)).map_err(|e| DecodeError::schema(kind, e))
}

fn decode_transfers(
    kind: &str,
    data: Value,
    default_origin: Option<&str>,
) -> Result<Envelope, DecodeError> {
    let items = match data {
        Value::Array(items) => items,
        obj @ Value::Object(_) => {
            let mut single = collect_transfers(kind, vec![obj], default_origin);
            return match single.pop() {
                Some(payload) => Ok(Envelope::Transfers(vec![payload])),
                None => Err(DecodeError::schema(kind, "event has neither id nor endpoints")),
            };
        }
        other => {
            return Err(DecodeError::schema(
                kind,
                format!("expected object or list, got {}", json_type(&other)),
            ))
        }
    };
    Ok(Envelope::Transfers(collect_transfers(kind, items, default_origin)))
}

// Per-entry isolation: one bad event never sinks its siblings.
fn collect_transfers(
    kind: &str,
    items: Vec<Value>,
    default_origin: Option<&str>,
) -> Vec<TransferPayload> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<TransferPayload>(item) {
            Ok(mut payload) => {
                if payload.origin.is_none() {
                    payload.origin = default_origin.map(str::to_string);
                }
                if payload.is_identifiable() {
                    Some(payload)
                } else {
                    tracing::warn!(kind, "Skipping event with neither id nor endpoints");
                    None
                }
            }
            Err(e) => {
                tracing::warn!(kind, error = %e, "Skipping invalid event entry");
                None
            }
        })
        .collect()
}

fn into_object(kind: &str, data: Value) -> Result<Map<String, Value>, DecodeError> {
    match data {
        Value::Object(obj) => Ok(obj),
        other => Err(DecodeError::schema(
            kind,
            format!("expected object, got {}", json_type(&other)),
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

// Counts may arrive as floats from JavaScript producers; negatives are invalid.
fn de_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(v) if v.is_finite() && v >= 0.0 => Ok(Some(v.round().min(f64::from(u32::MAX)) as u32)),
        Some(v) => Err(serde::de::Error::custom(format!(
            "count must be a non-negative number, got {}",
            v
        ))),
    }
}

// Accepts RFC 3339, or a naive ISO 8601 time read as UTC. Anything else is
// treated as missing so the entry falls back to its receive time.
fn de_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(Value::String(raw)) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(parse_timestamp(raw.trim()))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "id must be a string or number, got {}",
            json_type(&other)
        ))),
    }
}

fn de_urgency<'de, D>(deserializer: D) -> Result<Option<UrgencyTier>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(UrgencyTier::parse(&s)),
        Some(Value::Number(n)) => Some(UrgencyTier::parse(&n.to_string())),
        _ => None,
    })
}
