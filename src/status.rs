//! Status values — severity, diagnostic code and HTTP response code in one value.
//!
//! A [`Status`] is what every long-running operation resolves to. It is built
//! once and never mutated; the builder methods consume and return `self`.
//!
//! Wire format:
//!
//! ```text
//! { "HttpCode": 200, "Code": 0, "Message": "...", "Severity": "Ok",
//!   "ErrorData"?: { ... }, "DetailedMessage"?: "..." }
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::StatusParseError;

const KEY_HTTP_CODE: &str = "HttpCode";
const KEY_CODE: &str = "Code";
const KEY_MESSAGE: &str = "Message";
const KEY_SEVERITY: &str = "Severity";
const KEY_ERROR_DATA: &str = "ErrorData";
const KEY_DETAILED_MESSAGE: &str = "DetailedMessage";

/// HTTP 200.
pub const HTTP_OK: i32 = 200;
/// HTTP 500.
pub const HTTP_INTERNAL_SERVER_ERROR: i32 = 500;

/// Shared reference to the error underlying a status.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Severity of a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Ok,
    Info,
    Warning,
    Cancel,
    Error,
}

impl Severity {
    /// Wire name. Never translated.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Cancel => "Cancel",
            Self::Error => "Error",
        }
    }

    /// Parse a wire name. Anything unrecognised is `Ok`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "Error" => Self::Error,
            "Warning" => Self::Warning,
            "Info" => Self::Info,
            "Cancel" => Self::Cancel,
            _ => Self::Ok,
        }
    }

    /// HTTP code used when converting a status without an explicit one.
    pub fn default_http_code(&self) -> i32 {
        match self {
            Self::Error | Self::Cancel => HTTP_INTERNAL_SERVER_ERROR,
            _ => HTTP_OK,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cause rebuilt from a serialized `DetailedMessage`. Carries only the text.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct DetailedCause(pub String);

/// A lower-level status with no HTTP code attached, as produced by library
/// code that knows nothing about the request/response boundary.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: i32,
    pub message: String,
    pub cause: Option<Cause>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: 0,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }
}

/// Outcome of an operation, carrying both a severity and an HTTP response code.
///
/// Severity and HTTP code are chosen independently by the producer; the
/// OK/200, ERROR/500 pairing is only the default used by conversions.
#[derive(Debug, Clone)]
pub struct Status {
    severity: Severity,
    code: i32,
    http_code: i32,
    message: String,
    error_data: Option<Map<String, Value>>,
    cause: Option<Cause>,
}

impl Status {
    pub fn new(severity: Severity, http_code: i32, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: 0,
            http_code,
            message: message.into(),
            error_data: None,
            cause: None,
        }
    }

    /// `Ok` with HTTP 200.
    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Severity::Ok, HTTP_OK, message)
    }

    /// `Error` with the given HTTP code.
    pub fn error(http_code: i32, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, http_code, message)
    }

    /// `Cancel` with the default HTTP code for cancellation.
    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(
            Severity::Cancel,
            Severity::Cancel.default_http_code(),
            message,
        )
    }

    /// Convert a lower-level status using the default HTTP code for its severity.
    pub fn from_diagnostic(diagnostic: Diagnostic) -> Self {
        let http_code = diagnostic.severity.default_http_code();
        Self::from_diagnostic_with_http(diagnostic, http_code)
    }

    /// Convert a lower-level status with an explicit HTTP code.
    pub fn from_diagnostic_with_http(diagnostic: Diagnostic, http_code: i32) -> Self {
        Self {
            severity: diagnostic.severity,
            code: diagnostic.code,
            http_code,
            message: diagnostic.message,
            error_data: None,
            cause: diagnostic.cause,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    pub fn with_error_data(mut self, error_data: Map<String, Value>) -> Self {
        self.error_data = Some(error_data);
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn http_code(&self) -> i32 {
        self.http_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error_data(&self) -> Option<&Map<String, Value>> {
        self.error_data.as_ref()
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// Message of the underlying cause, if there is one.
    pub fn detailed_message(&self) -> Option<String> {
        self.cause.as_ref().map(|cause| cause.to_string())
    }

    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    /// Build the JSON object form.
    ///
    /// Infallible: every key is a constant and every value has a JSON form,
    /// so reporting a status can never itself raise.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(KEY_HTTP_CODE.to_string(), Value::from(self.http_code));
        object.insert(KEY_CODE.to_string(), Value::from(self.code));
        object.insert(KEY_MESSAGE.to_string(), Value::from(self.message.clone()));
        object.insert(
            KEY_SEVERITY.to_string(),
            Value::from(self.severity.as_str()),
        );
        if let Some(data) = &self.error_data {
            object.insert(KEY_ERROR_DATA.to_string(), Value::Object(data.clone()));
        }
        if let Some(detail) = self.detailed_message() {
            object.insert(KEY_DETAILED_MESSAGE.to_string(), Value::from(detail));
        }
        Value::Object(object)
    }

    /// Parse the JSON text produced by [`Status::to_json`].
    pub fn from_json(text: &str) -> Result<Self, StatusParseError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, StatusParseError> {
        Ok(serde_json::from_value(value)?)
    }
}

impl From<Diagnostic> for Status {
    fn from(diagnostic: Diagnostic) -> Self {
        Self::from_diagnostic(diagnostic)
    }
}

/// Equal when everything but the identity of the cause matches.
impl PartialEq for Status {
    fn eq(&self, other: &Self) -> bool {
        self.severity == other.severity
            && self.code == other.code
            && self.http_code == other.http_code
            && self.message == other.message
            && self.error_data == other.error_data
            && self.detailed_message() == other.detailed_message()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.severity, self.http_code, self.message)
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatusWire {
    http_code: i32,
    code: i32,
    message: String,
    severity: String,
    #[serde(default)]
    error_data: Option<Value>,
    #[serde(default)]
    detailed_message: Option<Value>,
}

impl From<StatusWire> for Status {
    fn from(wire: StatusWire) -> Self {
        let error_data = match wire.error_data {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        };
        let cause = match wire.detailed_message {
            Some(Value::String(text)) => Some(text),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        }
        .map(|text| Arc::new(DetailedCause(text)) as Cause);

        Self {
            severity: Severity::from_wire(&wire.severity),
            code: wire.code,
            http_code: wire.http_code,
            message: wire.message,
            error_data,
            cause,
        }
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        StatusWire::deserialize(deserializer).map(Status::from)
    }
}
