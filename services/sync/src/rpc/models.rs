use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Datetime layout used by the source for stored and filtered values.
pub const SOURCE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: RpcParams<'a>,
    pub id: u64,
}

impl<'a> RpcRequest<'a> {
    pub fn call(service: &'a str, method: &'a str, args: Vec<Value>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method: "call",
            params: RpcParams {
                service,
                method,
                args,
            },
            id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RpcParams<'a> {
    pub service: &'a str,
    pub method: &'a str,
    pub args: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    /// `Some(Value::Null)` for an explicit `null`, `None` when absent.
    #[serde(default, deserialize_with = "present")]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<RpcErrorData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcErrorData {
    /// Fully-qualified exception class, e.g. `odoo.exceptions.AccessDenied`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
}

impl RpcErrorBody {
    pub fn exception_name(&self) -> &str {
        self.data.as_ref().map_or("", |d| d.name.as_str())
    }

    /// Most specific message available.
    pub fn detail(&self) -> &str {
        match &self.data {
            Some(d) if !d.message.is_empty() => &d.message,
            _ => &self.message,
        }
    }
}

/// Parse a source datetime value. The source sends `false` for an empty
/// field; that and `null` map to `None`.
pub fn parse_source_timestamp(value: &Value) -> Result<Option<DateTime<Utc>>, String> {
    match value {
        Value::Null | Value::Bool(false) => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s.trim(), SOURCE_DATETIME_FORMAT) {
                return Ok(Some(naive.and_utc()));
            }
            DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|_| format!("unrecognized datetime: {s:?}"))
        }
        other => Err(format!("expected datetime string, got {other}")),
    }
}

/// Render a timestamp the way the source compares datetime fields.
pub fn format_source_timestamp(value: DateTime<Utc>) -> String {
    value.naive_utc().format(SOURCE_DATETIME_FORMAT).to_string()
}
