use std::fmt;

use serde::{Deserialize, Serialize};

/// Standard RPC status codes
///
/// The numeric values are the canonical ones shared by every
/// RPC-over-HTTP/2 implementation; this crate never invents new codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    const ALL: [Code; 17] = [
        Code::Ok,
        Code::Cancelled,
        Code::Unknown,
        Code::InvalidArgument,
        Code::DeadlineExceeded,
        Code::NotFound,
        Code::AlreadyExists,
        Code::PermissionDenied,
        Code::ResourceExhausted,
        Code::FailedPrecondition,
        Code::Aborted,
        Code::OutOfRange,
        Code::Unimplemented,
        Code::Internal,
        Code::Unavailable,
        Code::DataLoss,
        Code::Unauthenticated,
    ];

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Map a numeric code back; anything outside the standard range is `Unknown`
    pub fn from_i32(value: i32) -> Self {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .unwrap_or(Code::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a call: a code plus an optional description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    code: Code,
    description: Option<String>,
}

impl Status {
    pub fn new(code: Code, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
        }
    }

    /// A status carrying only a code
    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            description: None,
        }
    }

    pub fn ok() -> Self {
        Self::from_code(Code::Ok)
    }

    pub fn cancelled(description: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, description)
    }

    pub fn unknown(description: impl Into<String>) -> Self {
        Self::new(Code::Unknown, description)
    }

    pub fn invalid_argument(description: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, description)
    }

    pub fn deadline_exceeded(description: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, description)
    }

    pub fn not_found(description: impl Into<String>) -> Self {
        Self::new(Code::NotFound, description)
    }

    pub fn already_exists(description: impl Into<String>) -> Self {
        Self::new(Code::AlreadyExists, description)
    }

    pub fn permission_denied(description: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, description)
    }

    pub fn resource_exhausted(description: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, description)
    }

    pub fn failed_precondition(description: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, description)
    }

    pub fn unimplemented(description: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, description)
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(Code::Internal, description)
    }

    pub fn unavailable(description: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, description)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.code, description),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for Status {}
