//! Status envelope
//!
//! Every boundary-crossing call answers with an [`Envelope`]: a status code
//! and message plus either `data` or `error`. Callers branch on which of the
//! two is present, never on code ranges.
//!
//! # Code table
//!
//! | Tier    | Codes                          |
//! |---------|--------------------------------|
//! | SUCCESS | 200                            |
//! | WARN    | 300, 301, 302, 304             |
//! | ERROR   | 400, 401, 403, 404, 500, 503   |
//!
//! Any other code is treated as ERROR with a generic message.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const OK: u16 = 200;
pub const BAD_REQUEST: u16 = 400;
pub const NOT_FOUND: u16 = 404;
pub const INTERNAL: u16 = 500;
pub const TRANSPORT: u16 = 503;

const GENERIC_ERROR: &str = "Internal Server Error";

const SUCCESS_CODES: &[(u16, &str)] = &[(200, "Success")];

const WARN_CODES: &[(u16, &str)] = &[
    (300, "Warning"),
    (301, "Redirect"),
    (302, "Found"),
    (304, "Not Modified"),
];

const ERROR_CODES: &[(u16, &str)] = &[
    (400, "Bad Request"),
    (401, "Unauthorized"),
    (403, "Forbidden"),
    (404, "Not Found"),
    (500, GENERIC_ERROR),
    (503, "Service Unavailable"),
];

/// Status half of an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Status {
    pub fn new(code: u16) -> Self {
        Self { code, message: None }
    }

    pub fn with_message(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }
}

/// Classification of a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Success,
    Warn,
    Error,
}

/// Look up the tier and default message for a code.
///
/// Returns `None` for codes outside the table.
pub fn classify(code: u16) -> Option<(Tier, &'static str)> {
    let tables = [
        (Tier::Success, SUCCESS_CODES),
        (Tier::Warn, WARN_CODES),
        (Tier::Error, ERROR_CODES),
    ];

    tables.iter().find_map(|(tier, table)| {
        table
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, message)| (*tier, *message))
    })
}

/// What went wrong, as handed to [`wrap`]
#[derive(Debug, Clone, PartialEq)]
pub enum Cause {
    /// Message extracted from an error value
    Error(String),
    /// Arbitrary value carried as-is
    Raw(Value),
}

impl Cause {
    pub fn from_error<E: std::fmt::Display + ?Sized>(error: &E) -> Self {
        Cause::Error(error.to_string())
    }

    fn into_value(self) -> Value {
        match self {
            Cause::Error(message) => Value::String(message),
            Cause::Raw(value) => value,
        }
    }
}

impl From<Value> for Cause {
    fn from(value: Value) -> Self {
        Cause::Raw(value)
    }
}

/// Uniform result wrapper for every cross-boundary call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T = Value> {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Payload for envelopes that carry no meaningful data (serializes as `{}`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Build an envelope and log it by tier.
///
/// A missing `status.message` is filled from the code table. SUCCESS and WARN
/// carry `data`; ERROR carries `error` (the cause if given, otherwise the
/// resolved message). Unknown codes are downgraded to a generic ERROR.
pub fn wrap<T>(status: Status, data: Option<T>, cause: Option<Cause>) -> Envelope<T> {
    let known = classify(status.code);
    let message = status
        .message
        .clone()
        .unwrap_or_else(|| known.map(|(_, m)| m).unwrap_or(GENERIC_ERROR).to_string());
    let code = status.code;

    match known.map(|(tier, _)| tier) {
        Some(Tier::Success) => {
            tracing::info!(op = "envelope.success", code, "[SUCCESS] {}", message);
            Envelope {
                status: Status::with_message(code, message),
                data,
                error: None,
            }
        }
        Some(Tier::Warn) => {
            tracing::warn!(op = "envelope.warn", code, "[WARN] {}", message);
            Envelope {
                status: Status::with_message(code, message),
                data,
                error: None,
            }
        }
        Some(Tier::Error) => {
            tracing::error!(op = "envelope.error", code, "[ERROR] {}", message);
            let error = match cause {
                Some(cause) => {
                    let value = cause.into_value();
                    tracing::error!(op = "envelope.error.cause", code, cause = %value, "  └─ {}", value);
                    value
                }
                None => Value::String(message.clone()),
            };
            Envelope {
                status: Status::with_message(code, message),
                data: None,
                error: Some(error),
            }
        }
        None => {
            tracing::error!(op = "envelope.invalid_code", code, "[ERROR] Invalid status code: {}", code);
            Envelope {
                status,
                data: None,
                error: Some(Value::String(GENERIC_ERROR.to_string())),
            }
        }
    }
}

impl<T> Envelope<T> {
    /// 200 with data
    pub fn success(message: impl Into<String>, data: T) -> Self {
        wrap(Status::with_message(OK, message), Some(data), None)
    }

    /// ERROR-tier envelope carrying the error's message
    pub fn failure<E: std::fmt::Display + ?Sized>(
        code: u16,
        message: impl Into<String>,
        error: &E,
    ) -> Self {
        wrap(
            Status::with_message(code, message),
            None,
            Some(Cause::from_error(error)),
        )
    }

    /// ERROR-tier envelope whose error is the message itself
    pub fn status_only(code: u16, message: impl Into<String>) -> Self {
        wrap(Status::with_message(code, message), None, None)
    }

    pub fn code(&self) -> u16 {
        self.status.code
    }

    pub fn message(&self) -> &str {
        self.status.message.as_deref().unwrap_or("")
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Error rendered as a string (strings unquoted)
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| match e {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn into_result(self) -> Result<Option<T>, String> {
        match self.error {
            None => Ok(self.data),
            Some(Value::String(s)) => Err(s),
            Some(other) => Err(other.to_string()),
        }
    }

    /// Re-type an error envelope; data is dropped.
    pub fn cast<U>(self) -> Envelope<U> {
        Envelope {
            status: self.status,
            data: None,
            error: self.error,
        }
    }
}

impl<T: Serialize> Envelope<T> {
    /// Erase the data type for the wire.
    pub fn into_value(self) -> Envelope<Value> {
        let data = match self.data.map(serde_json::to_value).transpose() {
            Ok(data) => data,
            Err(e) => return Envelope::failure(INTERNAL, "Failed to serialize response data", &e),
        };
        Envelope {
            status: self.status,
            data,
            error: self.error,
        }
    }
}

impl Envelope<Value> {
    /// Recover typed data from a wire envelope.
    pub fn decode<T: DeserializeOwned>(self) -> Envelope<T> {
        let data = match self.data.map(serde_json::from_value).transpose() {
            Ok(data) => data,
            Err(e) => return Envelope::failure(INTERNAL, "Malformed response data", &e),
        };
        Envelope {
            status: self.status,
            data,
            error: self.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_populates_data_only() {
        let env = wrap(Status::new(200), Some(json!({"id": "x"})), None);
        assert_eq!(env.status.message.as_deref(), Some("Success"));
        assert_eq!(env.data, Some(json!({"id": "x"})));
        assert!(env.error.is_none());
    }

    #[test]
    fn test_error_codes_populate_error_only() {
        for code in [400u16, 401, 403, 404, 500] {
            let env: Envelope<Value> = wrap(
                Status::new(code),
                Some(json!({"ignored": true})),
                Some(Cause::Error("boom".to_string())),
            );
            assert_eq!(env.error, Some(json!("boom")), "code {}", code);
            assert!(env.data.is_none(), "code {}", code);
        }
    }

    #[test]
    fn test_error_without_cause_uses_message() {
        let env: Envelope<Value> = wrap(Status::new(404), None, None);
        assert_eq!(env.status.message.as_deref(), Some("Not Found"));
        assert_eq!(env.error_message().as_deref(), Some("Not Found"));
    }

    #[test]
    fn test_explicit_message_wins_over_table() {
        let env: Envelope<Value> = wrap(Status::with_message(500, "Chat list failed"), None, None);
        assert_eq!(env.message(), "Chat list failed");
    }

    #[test]
    fn test_warn_keeps_data() {
        let env = wrap(Status::new(304), Some(1), None);
        assert_eq!(env.status.message.as_deref(), Some("Not Modified"));
        assert_eq!(env.data, Some(1));
        assert!(env.is_ok());
    }

    #[test]
    fn test_unknown_code_is_generic_error() {
        let env = wrap(Status::new(299), Some(1), None);
        assert!(env.data.is_none());
        assert_eq!(env.error_message().as_deref(), Some("Internal Server Error"));
        assert_eq!(env.code(), 299);
    }

    #[test]
    fn test_raw_cause_carried_as_is() {
        let raw = json!({"detail": [1, 2]});
        let env: Envelope<Value> = wrap(Status::new(500), None, Some(Cause::from(raw.clone())));
        assert_eq!(env.error, Some(raw));
    }

    #[test]
    fn test_error_value_message_extracted() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let env: Envelope<Empty> = Envelope::failure(500, "Write failed", &io);
        assert_eq!(env.error_message().as_deref(), Some("disk gone"));
    }

    #[test]
    fn test_empty_serializes_as_object() {
        let env = Envelope::success("Deleted", Empty {});
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(wire["data"], json!({}));
        assert!(wire.get("error").is_none());
    }

    #[test]
    fn test_decode_rejects_mistyped_data() {
        let env = Envelope::success("ok", json!("not a number"));
        let typed: Envelope<u32> = env.decode();
        assert_eq!(typed.code(), 500);
        assert!(typed.data.is_none());
    }
}
