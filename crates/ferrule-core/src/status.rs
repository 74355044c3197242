//! HTTP status codes, families and the runtime status registry

use parking_lot::RwLock;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

/// HTTP status: numeric code plus reason phrase
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Status {
    pub code: u16,
    pub reason: Cow<'static, str>,
}

macro_rules! standard_statuses {
    ($($name:ident = $code:literal, $reason:literal;)+) => {
        impl Status {
            $(pub const $name: Status = Status { code: $code, reason: Cow::Borrowed($reason) };)+
        }

        fn standard_reason(code: u16) -> Option<&'static str> {
            match code {
                $($code => Some($reason),)+
                _ => None,
            }
        }
    };
}

standard_statuses! {
    CONTINUE = 100, "Continue";
    SWITCHING_PROTOCOLS = 101, "Switching Protocols";
    PROCESSING = 102, "Processing";
    EARLY_HINTS = 103, "Early Hints";
    OK = 200, "OK";
    CREATED = 201, "Created";
    ACCEPTED = 202, "Accepted";
    NON_AUTHORITATIVE_INFORMATION = 203, "Non-Authoritative Information";
    NO_CONTENT = 204, "No Content";
    RESET_CONTENT = 205, "Reset Content";
    PARTIAL_CONTENT = 206, "Partial Content";
    MULTI_STATUS = 207, "Multi-Status";
    ALREADY_REPORTED = 208, "Already Reported";
    IM_USED = 226, "IM Used";
    MULTIPLE_CHOICES = 300, "Multiple Choices";
    MOVED_PERMANENTLY = 301, "Moved Permanently";
    FOUND = 302, "Found";
    SEE_OTHER = 303, "See Other";
    NOT_MODIFIED = 304, "Not Modified";
    USE_PROXY = 305, "Use Proxy";
    TEMPORARY_REDIRECT = 307, "Temporary Redirect";
    PERMANENT_REDIRECT = 308, "Permanent Redirect";
    BAD_REQUEST = 400, "Bad Request";
    UNAUTHORIZED = 401, "Unauthorized";
    PAYMENT_REQUIRED = 402, "Payment Required";
    FORBIDDEN = 403, "Forbidden";
    NOT_FOUND = 404, "Not Found";
    METHOD_NOT_ALLOWED = 405, "Method Not Allowed";
    NOT_ACCEPTABLE = 406, "Not Acceptable";
    PROXY_AUTHENTICATION_REQUIRED = 407, "Proxy Authentication Required";
    REQUEST_TIMEOUT = 408, "Request Timeout";
    CONFLICT = 409, "Conflict";
    GONE = 410, "Gone";
    LENGTH_REQUIRED = 411, "Length Required";
    PRECONDITION_FAILED = 412, "Precondition Failed";
    PAYLOAD_TOO_LARGE = 413, "Payload Too Large";
    URI_TOO_LONG = 414, "URI Too Long";
    UNSUPPORTED_MEDIA_TYPE = 415, "Unsupported Media Type";
    RANGE_NOT_SATISFIABLE = 416, "Range Not Satisfiable";
    EXPECTATION_FAILED = 417, "Expectation Failed";
    IM_A_TEAPOT = 418, "I'm a teapot";
    MISDIRECTED_REQUEST = 421, "Misdirected Request";
    UNPROCESSABLE_ENTITY = 422, "Unprocessable Entity";
    LOCKED = 423, "Locked";
    FAILED_DEPENDENCY = 424, "Failed Dependency";
    TOO_EARLY = 425, "Too Early";
    UPGRADE_REQUIRED = 426, "Upgrade Required";
    PRECONDITION_REQUIRED = 428, "Precondition Required";
    TOO_MANY_REQUESTS = 429, "Too Many Requests";
    REQUEST_HEADER_FIELDS_TOO_LARGE = 431, "Request Header Fields Too Large";
    UNAVAILABLE_FOR_LEGAL_REASONS = 451, "Unavailable For Legal Reasons";
    INTERNAL_SERVER_ERROR = 500, "Internal Server Error";
    NOT_IMPLEMENTED = 501, "Not Implemented";
    BAD_GATEWAY = 502, "Bad Gateway";
    SERVICE_UNAVAILABLE = 503, "Service Unavailable";
    GATEWAY_TIMEOUT = 504, "Gateway Timeout";
    HTTP_VERSION_NOT_SUPPORTED = 505, "HTTP Version Not Supported";
    VARIANT_ALSO_NEGOTIATES = 506, "Variant Also Negotiates";
    INSUFFICIENT_STORAGE = 507, "Insufficient Storage";
    LOOP_DETECTED = 508, "Loop Detected";
    NOT_EXTENDED = 510, "Not Extended";
    NETWORK_AUTHENTICATION_REQUIRED = 511, "Network Authentication Required";
}

impl Status {
    /// Build a status with an arbitrary reason
    pub fn new(code: u16, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Standard table first, then the family fallback reason
    pub fn from_code(code: u16) -> Self {
        match standard_reason(code) {
            Some(reason) => Self::new(code, reason),
            None => Self::new(code, StatusFamily::of(code).fallback_reason()),
        }
    }

    pub fn family(&self) -> StatusFamily {
        StatusFamily::of(self.code)
    }

    pub fn is_success(&self) -> bool {
        self.family() == StatusFamily::Success
    }

    pub fn is_client_error(&self) -> bool {
        self.family() == StatusFamily::ClientError
    }

    pub fn is_server_error(&self) -> bool {
        self.family() == StatusFamily::ServerError
    }
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        Status::from_code(code)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// Status class, keyed on the hundreds digit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusFamily {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    Other,
}

impl StatusFamily {
    pub fn of(code: u16) -> Self {
        match code {
            100..=199 => StatusFamily::Informational,
            200..=299 => StatusFamily::Success,
            300..=399 => StatusFamily::Redirection,
            400..=499 => StatusFamily::ClientError,
            500..=599 => StatusFamily::ServerError,
            _ => StatusFamily::Other,
        }
    }

    /// Reason used for codes missing from every table
    pub fn fallback_reason(&self) -> &'static str {
        match self {
            StatusFamily::Informational => "Informational",
            StatusFamily::Success => "Success",
            StatusFamily::Redirection => "Redirection",
            StatusFamily::ClientError => "Client Error",
            StatusFamily::ServerError => "Server Error",
            StatusFamily::Other => "Unknown",
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            StatusFamily::Informational => "1xx",
            StatusFamily::Success => "2xx",
            StatusFamily::Redirection => "3xx",
            StatusFamily::ClientError => "4xx",
            StatusFamily::ServerError => "5xx",
            StatusFamily::Other => "other",
        }
    }
}

/// Runtime overrides and additions to the standard status table.
///
/// Custom entries win over the standard table; anything unknown to both
/// resolves to its family fallback.
#[derive(Debug, Default)]
pub struct StatusRegistry {
    custom: RwLock<HashMap<u16, Cow<'static, str>>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by response parsing
    pub fn global() -> &'static StatusRegistry {
        static GLOBAL: OnceLock<StatusRegistry> = OnceLock::new();
        GLOBAL.get_or_init(StatusRegistry::new)
    }

    pub fn register(&self, code: u16, reason: impl Into<Cow<'static, str>>) {
        self.custom.write().insert(code, reason.into());
    }

    pub fn register_batch<I, R>(&self, entries: I)
    where
        I: IntoIterator<Item = (u16, R)>,
        R: Into<Cow<'static, str>>,
    {
        let mut custom = self.custom.write();
        for (code, reason) in entries {
            custom.insert(code, reason.into());
        }
    }

    /// Remove a custom entry, returning its reason if one was registered
    pub fn unregister(&self, code: u16) -> Option<Cow<'static, str>> {
        self.custom.write().remove(&code)
    }

    pub fn resolve(&self, code: u16) -> Status {
        match self.custom.read().get(&code) {
            Some(reason) => Status::new(code, reason.clone()),
            None => Status::from_code(code),
        }
    }

    pub fn has_custom(&self, code: u16) -> bool {
        self.custom.read().contains_key(&code)
    }

    /// Copy of the custom entries
    pub fn snapshot(&self) -> HashMap<u16, Cow<'static, str>> {
        self.custom.read().clone()
    }

    pub fn clear(&self) {
        self.custom.write().clear();
    }

    pub fn custom_count(&self) -> usize {
        self.custom.read().len()
    }
}
