//! Span types
//!
//! `RawSpan` is the wire format emitted by instrumented applications.
//! `DomainSpan` is the normalized form handed to storage and to the tree
//! aggregator.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

/// Flattened `dotted.key -> value` attribute map
pub type FlatMap = BTreeMap<String, JsonValue>;

// ============================================================================
// WIRE FORMAT
// ============================================================================

/// Span as emitted by instrumented applications
///
/// Ids are lowercase hex (16 bytes for traces, 8 bytes for spans), times are
/// nanoseconds since the Unix epoch. `kind` and `status_code` stay strings
/// here and are validated when a builder turns the span into a `DomainSpan`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSpan {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub kind: String,
    pub name: String,
    pub start_time: u64,
    pub end_time: u64,
    #[serde(default)]
    pub status_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default)]
    pub attributes: JsonMap<String, JsonValue>,
    #[serde(default)]
    pub events: Vec<RawEvent>,
    #[serde(default)]
    pub links: Vec<RawLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub name: String,
    pub timestamp: u64,
    #[serde(default)]
    pub attributes: JsonMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLink {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub attributes: JsonMap<String, JsonValue>,
}

// ============================================================================
// ENUMS
// ============================================================================

/// Error for unrecognized kind or status strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized value '{}'", self.0)
    }
}

/// Lowercase a wire value and drop its OTel proto prefix (`SPAN_KIND_`, `STATUS_CODE_`)
fn normalize_variant(s: &str, proto_prefix: &str) -> String {
    let lower = s.trim().to_ascii_lowercase();
    lower
        .strip_prefix(proto_prefix)
        .map(str::to_string)
        .unwrap_or(lower)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Unspecified => "unspecified",
            SpanKind::Internal => "internal",
            SpanKind::Server => "server",
            SpanKind::Client => "client",
            SpanKind::Producer => "producer",
            SpanKind::Consumer => "consumer",
        }
    }

    /// Map the OTLP protobuf enum value
    pub fn from_otlp(kind: i32) -> Self {
        match kind {
            1 => SpanKind::Internal,
            2 => SpanKind::Server,
            3 => SpanKind::Client,
            4 => SpanKind::Producer,
            5 => SpanKind::Consumer,
            _ => SpanKind::Unspecified,
        }
    }
}

impl FromStr for SpanKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_variant(s, "span_kind_").as_str() {
            "" | "unspecified" => Ok(SpanKind::Unspecified),
            "internal" => Ok(SpanKind::Internal),
            "server" => Ok(SpanKind::Server),
            "client" => Ok(SpanKind::Client),
            "producer" => Ok(SpanKind::Producer),
            "consumer" => Ok(SpanKind::Consumer),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Unset => "unset",
            StatusCode::Ok => "ok",
            StatusCode::Error => "error",
        }
    }

    /// Map the OTLP protobuf enum value
    pub fn from_otlp(code: i32) -> Self {
        match code {
            1 => StatusCode::Ok,
            2 => StatusCode::Error,
            _ => StatusCode::Unset,
        }
    }
}

impl FromStr for StatusCode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_variant(s, "status_code_").as_str() {
            "" | "unset" => Ok(StatusCode::Unset),
            "ok" => Ok(StatusCode::Ok),
            "error" => Ok(StatusCode::Error),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// DOMAIN SPAN
// ============================================================================

/// Normalized span
///
/// Attribute buckets hold flattened keys without their namespace prefix
/// (`metrics["costs.incremental.total"]`, `refs["application.id"]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSpan {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub trace_type: Option<String>,
    pub span_type: Option<String>,
    pub span_kind: SpanKind,
    pub span_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status_code: StatusCode,
    pub status_message: Option<String>,
    #[serde(default)]
    pub data: FlatMap,
    #[serde(default)]
    pub metrics: FlatMap,
    #[serde(default)]
    pub meta: FlatMap,
    #[serde(default)]
    pub refs: FlatMap,
    #[serde(default)]
    pub tags: FlatMap,
    #[serde(default)]
    pub flags: FlatMap,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
    #[serde(default)]
    pub links: Vec<SpanLink>,
}

impl DomainSpan {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attributes: FlatMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    #[serde(default)]
    pub attributes: FlatMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_kind_accepts_both_spellings() {
        assert_eq!("server".parse::<SpanKind>().unwrap(), SpanKind::Server);
        assert_eq!(
            "SPAN_KIND_SERVER".parse::<SpanKind>().unwrap(),
            SpanKind::Server
        );
        assert_eq!("Client".parse::<SpanKind>().unwrap(), SpanKind::Client);
        assert_eq!("".parse::<SpanKind>().unwrap(), SpanKind::Unspecified);
    }

    #[test]
    fn test_span_kind_rejects_unknown() {
        let err = "sideways".parse::<SpanKind>().unwrap_err();
        assert_eq!(err.to_string(), "unrecognized value 'sideways'");
    }

    #[test]
    fn test_status_code_parse() {
        assert_eq!("ok".parse::<StatusCode>().unwrap(), StatusCode::Ok);
        assert_eq!(
            "STATUS_CODE_ERROR".parse::<StatusCode>().unwrap(),
            StatusCode::Error
        );
        assert_eq!("".parse::<StatusCode>().unwrap(), StatusCode::Unset);
        assert!("failed".parse::<StatusCode>().is_err());
    }

    #[test]
    fn test_otlp_enum_mapping() {
        assert_eq!(SpanKind::from_otlp(2), SpanKind::Server);
        assert_eq!(SpanKind::from_otlp(42), SpanKind::Unspecified);
        assert_eq!(StatusCode::from_otlp(2), StatusCode::Error);
        assert_eq!(StatusCode::from_otlp(0), StatusCode::Unset);
    }

    #[test]
    fn test_raw_span_json_defaults() {
        let json = r#"{
            "trace_id": "0af7651916cd43dd8448eb211c80319c",
            "span_id": "b7ad6b7169203331",
            "name": "root",
            "start_time": 1,
            "end_time": 2
        }"#;
        let span: RawSpan = serde_json::from_str(json).unwrap();
        assert!(span.parent_id.is_none());
        assert!(span.kind.is_empty());
        assert!(span.attributes.is_empty());
        assert!(span.events.is_empty());
    }
}
