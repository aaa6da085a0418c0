use thiserror::Error;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Startup-time configuration failure. Any of these blocks the affected
/// phase from activating; none of them can occur per-request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("unknown http auth type '{name}'")]
    UnknownAuth { name: String },
    #[error("unsupported http auth type '{name}', not available in this build")]
    UnsupportedAuth { name: String },
    #[error("unknown http body type '{name}'")]
    UnknownBodyType { name: String },
    #[error("unsupported http body type '{name}'")]
    UnsupportedBodyType { name: String },
    #[error("invalid http body type '{name}', not a web api data markup format")]
    InvalidBodyType { name: String },
    #[error("unavailable http body type '{name}', not available in this build")]
    UnavailableBodyType { name: String },
    #[error("'username' and 'password' must both be set or both be absent")]
    CredentialPair,
    #[error("'uri' must be set and non-empty")]
    MissingUri,
    #[error("'timeout' must be greater than zero")]
    InvalidTimeout,
    #[error("invalid proxy uri '{proxy}'")]
    InvalidProxy { proxy: String },
    #[error("invalid tls configuration: {message}")]
    TlsConfig { message: String },
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Template expansion failure.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unterminated attribute reference in template '{template}'")]
    Unterminated { template: String },
}

/// Per-invocation failure while preparing a request. Converted to the
/// `invalid` outcome before any network activity.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("failed to expand template: {source}")]
    Template {
        #[from]
        source: TemplateError,
    },
    #[error("uri template expanded to an empty string")]
    EmptyUri,
    #[error("expanded uri is invalid: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid http method token '{method}'")]
    InvalidMethod { method: String },
    #[error("auth mode requires credentials but '{name}' is missing or empty")]
    MissingCredential { name: &'static str },
    #[error("failed to encode request body: {source}")]
    Encode {
        #[from]
        source: CodecError,
    },
    #[error("failed to assemble http request: {source}")]
    Request {
        #[source]
        source: http::Error,
    },
}

/// Coarse transport failure classification, derived from the underlying
/// client error text the same way on every path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Per-invocation transport failure. Converted to the `fail` outcome;
/// the leased handle is still released.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("connection pool exhausted ({capacity} handles in use)")]
    PoolExhausted { capacity: usize },
    #[error("failed to construct connection handle: {message}")]
    HandleConstruct { message: String },
    #[error("handle already has an exchange in progress")]
    HandleBusy,
    #[error("refusing to enqueue request with scheme '{scheme}'")]
    InvalidScheme { scheme: String },
    #[error("http exchange failed ({kind}): {source}")]
    Exchange {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
    #[error("http exchange timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u128 },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("response body too large ({actual_bytes} bytes > {limit_bytes} bytes)")]
    BodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
    },
    #[error("exchange was cancelled before completion")]
    Cancelled,
}

/// Body encoder/decoder failure. A decode failure escalates the classified
/// outcome to `fail`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("json: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("form: {source}")]
    Form {
        #[from]
        source: serde_urlencoded::ser::Error,
    },
    #[error("{message}")]
    Malformed { message: String },
}
