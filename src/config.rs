use std::time::Duration;

use http::Uri;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::tls::{ResolvedTls, resolve_tls};

/// Pipeline phase a section belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Authorize,
    Authenticate,
    Accounting,
    PostAuth,
}

impl Phase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::Authenticate => "authenticate",
            Self::Accounting => "accounting",
            Self::PostAuth => "post-auth",
        }
    }

    /// Accounting-style phases use the reduced classification table and
    /// never treat 401/403/404 specially.
    pub(crate) const fn is_delivery(self) -> bool {
        matches!(self, Self::Accounting | Self::PostAuth)
    }
}

/// HTTP method, with unknown names carried as custom verbs rather than
/// rejected at configuration time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Custom(String),
}

impl HttpMethod {
    pub(crate) fn resolve(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            _ => Self::Custom(name.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Authentication mode applied to outgoing requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthKind {
    None,
    Basic,
    Bearer,
    Digest,
    Ntlm,
    Negotiate,
    Any,
}

impl AuthKind {
    fn resolve(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "basic" => Some(Self::Basic),
            "bearer" => Some(Self::Bearer),
            "digest" => Some(Self::Digest),
            "ntlm" => Some(Self::Ntlm),
            "gss-negotiate" => Some(Self::Negotiate),
            "any" => Some(Self::Any),
            _ => None,
        }
    }

    /// Modes this build can actually attach to a request. The vocabulary
    /// is wider than the implementation so that configurations written
    /// for richer builds fail with a precise error.
    const fn supported(self) -> bool {
        matches!(self, Self::None | Self::Basic | Self::Bearer)
    }

    pub(crate) const fn needs_credentials(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Canonical body types understood by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BodyType {
    None,
    Post,
    Json,
    Xml,
    Yaml,
    Html,
    Plain,
    /// Request body produced by expanding the section's `data` template.
    CustomTemplate,
    /// Request body passed through verbatim.
    CustomLiteral,
}

/// Support level of a body type in this build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BodySupport {
    Supported,
    /// Recognized but not implemented anywhere.
    Unsupported,
    /// Not a web API data markup format at all.
    Invalid,
    /// Valid format with no codec linked into this build.
    Unavailable,
}

pub(crate) const fn body_support(body: BodyType) -> BodySupport {
    match body {
        BodyType::None
        | BodyType::Post
        | BodyType::Json
        | BodyType::Plain
        | BodyType::CustomTemplate
        | BodyType::CustomLiteral => BodySupport::Supported,
        BodyType::Xml => BodySupport::Unavailable,
        BodyType::Yaml => BodySupport::Unsupported,
        BodyType::Html => BodySupport::Invalid,
    }
}

const CANONICAL_BODY_TABLE: &[(&str, BodyType)] = &[
    ("none", BodyType::None),
    ("post", BodyType::Post),
    ("json", BodyType::Json),
    ("xml", BodyType::Xml),
    ("yaml", BodyType::Yaml),
    ("html", BodyType::Html),
    ("plain", BodyType::Plain),
];

const CONTENT_TYPE_TABLE: &[(&str, BodyType)] = &[
    ("application/x-www-form-urlencoded", BodyType::Post),
    ("application/json", BodyType::Json),
    ("text/xml", BodyType::Xml),
    ("text/yaml", BodyType::Yaml),
    ("text/html", BodyType::Html),
    ("text/plain", BodyType::Plain),
];

/// Result of resolving a body-type name through both vocabularies.
///
/// Each failure mode is distinct so the resolver can report precisely why
/// a name was rejected instead of folding everything into one sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BodyResolution {
    Found(BodyType),
    Unsupported(BodyType),
    Invalid(BodyType),
    Unavailable(BodyType),
    NotFound,
}

/// Looks a name up in the canonical vocabulary first, then the MIME
/// content-type vocabulary, and tags the result with its support level.
pub(crate) fn resolve_body_type(name: &str) -> BodyResolution {
    let canonical = CANONICAL_BODY_TABLE
        .iter()
        .find(|(entry, _)| entry.eq_ignore_ascii_case(name));
    let matched = canonical.or_else(|| {
        CONTENT_TYPE_TABLE
            .iter()
            .find(|(entry, _)| entry.eq_ignore_ascii_case(name))
    });

    let Some((_, body)) = matched else {
        return BodyResolution::NotFound;
    };
    match body_support(*body) {
        BodySupport::Supported => BodyResolution::Found(*body),
        BodySupport::Unsupported => BodyResolution::Unsupported(*body),
        BodySupport::Invalid => BodyResolution::Invalid(*body),
        BodySupport::Unavailable => BodyResolution::Unavailable(*body),
    }
}

/// Best-effort reverse map from a canonical body type to the MIME string
/// used for the Content-Type header.
pub(crate) fn content_type_for(body: BodyType) -> Option<&'static str> {
    CONTENT_TYPE_TABLE
        .iter()
        .find(|(_, entry)| *entry == body)
        .map(|(mime, _)| *mime)
}

/// Maps a response Content-Type header value onto a body type for
/// decoder selection. Parameters after ';' are ignored.
pub(crate) fn body_type_from_content_type(header: &str) -> Option<BodyType> {
    let mime = header.split(';').next().unwrap_or(header).trim();
    CONTENT_TYPE_TABLE
        .iter()
        .find(|(entry, _)| entry.eq_ignore_ascii_case(mime))
        .map(|(_, body)| *body)
}

/// Raw TLS settings group, one per section.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsSettings {
    pub ca_file: Option<String>,
    pub ca_path: Option<String>,
    pub certificate_file: Option<String>,
    pub private_key_file: Option<String>,
    pub private_key_password: Option<String>,
    /// Accepted for compatibility; entropy comes from the platform.
    pub random_file: Option<String>,
    pub check_cert: bool,
    pub check_cert_cn: bool,
    pub extract_cert_attrs: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            ca_file: None,
            ca_path: None,
            certificate_file: None,
            private_key_file: None,
            private_key_password: None,
            random_file: None,
            check_cert: true,
            check_cert_cn: true,
            extract_cert_attrs: false,
        }
    }
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TlsSettings")
            .field("ca_file", &self.ca_file)
            .field("ca_path", &self.ca_path)
            .field("certificate_file", &self.certificate_file)
            .field("private_key_file", &self.private_key_file)
            .field(
                "private_key_password",
                &self.private_key_password.as_ref().map(|_| "<secret>"),
            )
            .field("check_cert", &self.check_cert)
            .field("check_cert_cn", &self.check_cert_cn)
            .field("extract_cert_attrs", &self.extract_cert_attrs)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for SectionSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SectionSettings")
            .field("uri", &self.uri)
            .field("method", &self.method)
            .field("body", &self.body)
            .field("auth", &self.auth)
            .field("require_auth", &self.require_auth)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Raw declarative settings for one phase, as parsed from configuration.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SectionSettings {
    pub uri: String,
    pub proxy: Option<String>,
    #[serde(rename = "method")]
    pub method: String,
    pub body: String,
    pub data: Option<String>,
    pub force_to: Option<String>,
    pub auth: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub require_auth: bool,
    /// Per-call timeout in seconds.
    pub timeout: f64,
    /// Chunked transfer frame size in bytes; 0 sends one buffered body.
    pub chunk: u32,
    pub tls: TlsSettings,
}

impl Default for SectionSettings {
    fn default() -> Self {
        Self {
            uri: String::new(),
            proxy: None,
            method: "GET".to_owned(),
            body: "none".to_owned(),
            data: None,
            force_to: None,
            auth: "none".to_owned(),
            username: None,
            password: None,
            require_auth: false,
            timeout: 4.0,
            chunk: 0,
            tls: TlsSettings::default(),
        }
    }
}

/// Module-level settings plus the raw per-phase sections.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModuleSettings {
    pub connect_proxy: Option<String>,
    pub authorize: Option<SectionSettings>,
    pub authenticate: Option<SectionSettings>,
    pub accounting: Option<SectionSettings>,
    pub post_auth: Option<SectionSettings>,
}

/// Validated, immutable per-phase configuration. Built once at startup
/// and shared read-only across workers.
#[derive(Debug)]
pub struct SectionConfig {
    pub(crate) phase: Phase,
    pub(crate) uri: String,
    pub(crate) proxy: Option<Uri>,
    pub(crate) method: HttpMethod,
    pub(crate) body: BodyType,
    /// MIME string sent as Content-Type when a body is attached.
    pub(crate) body_content_type: Option<String>,
    pub(crate) data: Option<String>,
    pub(crate) force_to: Option<BodyType>,
    pub(crate) auth: AuthKind,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) require_auth: bool,
    pub(crate) timeout: Duration,
    pub(crate) chunk: usize,
    pub(crate) tls: ResolvedTls,
    pub(crate) extract_cert_attrs: bool,
}

impl SectionConfig {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Resolves one phase's raw settings into a validated section
/// configuration. Pure validation and normalization; no network I/O.
pub(crate) fn resolve_section(
    phase: Phase,
    settings: &SectionSettings,
) -> Result<SectionConfig, ConfigError> {
    if settings.uri.trim().is_empty() {
        return Err(ConfigError::MissingUri);
    }
    if !settings.timeout.is_finite() || settings.timeout <= 0.0 {
        return Err(ConfigError::InvalidTimeout);
    }
    if settings.username.is_some() != settings.password.is_some() {
        return Err(ConfigError::CredentialPair);
    }

    let auth =
        AuthKind::resolve(&settings.auth).ok_or_else(|| ConfigError::UnknownAuth {
            name: settings.auth.clone(),
        })?;
    if !auth.supported() {
        return Err(ConfigError::UnsupportedAuth {
            name: settings.auth.clone(),
        });
    }

    let method = HttpMethod::resolve(&settings.method);

    let (body, body_content_type) = match &settings.data {
        // A literal data template overrides the encoder; the configured
        // body name only contributes the Content-Type header.
        Some(_) => {
            let content_type = match resolve_body_type(&settings.body) {
                BodyResolution::Found(body)
                | BodyResolution::Unsupported(body)
                | BodyResolution::Invalid(body)
                | BodyResolution::Unavailable(body) => content_type_for(body)
                    .map(ToOwned::to_owned)
                    .or_else(|| Some(settings.body.clone())),
                BodyResolution::NotFound => Some(settings.body.clone()),
            };
            (BodyType::CustomTemplate, content_type)
        }
        None => {
            let body = match resolve_body_type(&settings.body) {
                BodyResolution::Found(body) => body,
                BodyResolution::Unsupported(_) => {
                    return Err(ConfigError::UnsupportedBodyType {
                        name: settings.body.clone(),
                    });
                }
                BodyResolution::Invalid(_) => {
                    return Err(ConfigError::InvalidBodyType {
                        name: settings.body.clone(),
                    });
                }
                BodyResolution::Unavailable(_) => {
                    return Err(ConfigError::UnavailableBodyType {
                        name: settings.body.clone(),
                    });
                }
                BodyResolution::NotFound => {
                    return Err(ConfigError::UnknownBodyType {
                        name: settings.body.clone(),
                    });
                }
            };
            let content_type = content_type_for(body).map(ToOwned::to_owned);
            (body, content_type)
        }
    };

    let force_to = match &settings.force_to {
        None => None,
        Some(name) => Some(match resolve_body_type(name) {
            // Decoding overrides tolerate formats the build cannot
            // encode; unavailability only matters for request bodies.
            BodyResolution::Found(body) | BodyResolution::Unavailable(body) => body,
            BodyResolution::Unsupported(_) => {
                return Err(ConfigError::UnsupportedBodyType { name: name.clone() });
            }
            BodyResolution::Invalid(_) => {
                return Err(ConfigError::InvalidBodyType { name: name.clone() });
            }
            BodyResolution::NotFound => {
                return Err(ConfigError::UnknownBodyType { name: name.clone() });
            }
        }),
    };

    let proxy = settings
        .proxy
        .as_deref()
        .map(|proxy| {
            proxy.parse::<Uri>().map_err(|_| ConfigError::InvalidProxy {
                proxy: proxy.to_owned(),
            })
        })
        .transpose()?;

    let tls = resolve_tls(&settings.tls)?;

    Ok(SectionConfig {
        phase,
        uri: settings.uri.clone(),
        proxy,
        method,
        body,
        body_content_type,
        data: settings.data.clone(),
        force_to,
        auth,
        username: settings.username.clone(),
        password: settings.password.clone(),
        require_auth: settings.require_auth,
        timeout: Duration::try_from_secs_f64(settings.timeout)
            .map_err(|_| ConfigError::InvalidTimeout)?,
        chunk: settings.chunk as usize,
        tls,
        extract_cert_attrs: settings.tls.extract_cert_attrs,
    })
}
