//! IPC protocol types and validation for sessionclean-daemon.
//!
//! This crate is shared by the daemon and its clients (review UI, tray, CLI)
//! to prevent schema drift. The daemon remains the authority on validation,
//! but clients can reuse the same types to construct valid requests.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 4 * 1024 * 1024; // 4MB
pub const MAX_DECISIONS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetStatus,
    GetReview,
    ReviewNow,
    SubmitDecisions,
    DismissReview,
    Rescan,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum DecisionValue {
    Keep,
    Delete,
}

/// Parameters of `submit_decisions`.
///
/// `all` is the "select all" shortcut: it applies to every candidate of the
/// offered round, and explicit `decisions` entries override it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubmitDecisionsParams {
    pub session_id: String,
    pub round: u32,
    #[serde(default)]
    pub decisions: BTreeMap<String, DecisionValue>,
    #[serde(default)]
    pub all: Option<DecisionValue>,
}

impl SubmitDecisionsParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.session_id.trim().is_empty() {
            return Err(ErrorInfo::new(
                "missing_field",
                "session_id is required",
            ));
        }
        // Session ids are their start timestamps.
        if DateTime::parse_from_rfc3339(&self.session_id).is_err() {
            return Err(ErrorInfo::new(
                "invalid_session_id",
                "session_id must be an RFC3339 timestamp",
            ));
        }
        if self.round == 0 {
            return Err(ErrorInfo::new("invalid_round", "round must be 1 or greater"));
        }
        if self.decisions.len() > MAX_DECISIONS {
            return Err(ErrorInfo::new(
                "too_many_decisions",
                format!("at most {} decisions per batch", MAX_DECISIONS),
            ));
        }
        for path in self.decisions.keys() {
            if path.trim().is_empty() {
                return Err(ErrorInfo::new("invalid_path", "decision path is empty"));
            }
            if !std::path::Path::new(path).is_absolute() {
                return Err(ErrorInfo::new(
                    "invalid_path",
                    format!("decision path must be absolute: {}", path),
                ));
            }
        }
        Ok(())
    }
}

pub fn parse_submit_decisions(params: Value) -> Result<SubmitDecisionsParams, ErrorInfo> {
    let parsed: SubmitDecisionsParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("submit_decisions payload is invalid JSON: {}", err),
        )
    })?;
    parsed.validate()?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> SubmitDecisionsParams {
        SubmitDecisionsParams {
            session_id: "2026-03-01T09:00:00.000000Z".to_string(),
            round: 1,
            decisions: BTreeMap::from([(
                "/home/u/Downloads/a.pdf".to_string(),
                DecisionValue::Delete,
            )]),
            all: None,
        }
    }

    #[test]
    fn validates_submit_params() {
        assert!(base_params().validate().is_ok());
    }

    #[test]
    fn empty_batch_is_valid() {
        let mut params = base_params();
        params.decisions.clear();
        assert!(params.validate().is_ok());
    }

    #[test]
    fn rejects_round_zero() {
        let mut params = base_params();
        params.round = 0;
        assert_eq!(params.validate().unwrap_err().code, "invalid_round");
    }

    #[test]
    fn rejects_bad_session_id() {
        let mut params = base_params();
        params.session_id = "session-1".to_string();
        assert_eq!(params.validate().unwrap_err().code, "invalid_session_id");
    }

    #[test]
    fn rejects_relative_paths() {
        let mut params = base_params();
        params
            .decisions
            .insert("Downloads/b.pdf".to_string(), DecisionValue::Keep);
        assert_eq!(params.validate().unwrap_err().code, "invalid_path");
    }

    #[test]
    fn parses_bulk_shortcut() {
        let params = parse_submit_decisions(serde_json::json!({
            "session_id": "2026-03-01T09:00:00.000000Z",
            "round": 2,
            "all": "delete"
        }))
        .expect("params");
        assert_eq!(params.all, Some(DecisionValue::Delete));
        assert!(params.decisions.is_empty());
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = parse_submit_decisions(serde_json::json!({
            "session_id": "2026-03-01T09:00:00.000000Z",
            "round": 1,
            "force": true
        }))
        .unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn method_names_are_snake_case() {
        let request: Request = serde_json::from_str(
            r#"{"protocol_version":1,"method":"submit_decisions","params":{}}"#,
        )
        .expect("request");
        assert_eq!(request.method, Method::SubmitDecisions);
    }
}
