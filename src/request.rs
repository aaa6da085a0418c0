use std::convert::Infallible;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;

use crate::codec::CodecSet;
use crate::config::{AuthKind, BodyType, HttpMethod, SectionConfig};
use crate::error::{BoxError, BuildError, CodecError};
use crate::state::PipelineState;
use crate::template::{Escape, expand};
use crate::transport::ReqBody;

/// One exchange's worth of transport configuration, ready to enqueue.
pub(crate) struct PreparedRequest {
    pub(crate) request: Request<ReqBody>,
    pub(crate) timeout: Duration,
}

fn map_infallible(never: Infallible) -> BoxError {
    match never {}
}

pub(crate) fn buffered_req_body(body: Bytes) -> ReqBody {
    Full::new(body).map_err(map_infallible).boxed()
}

/// Splits the body into fixed-size frames so the transfer goes out
/// chunked instead of with a Content-Length.
pub(crate) fn chunked_req_body(body: Bytes, chunk: usize) -> ReqBody {
    let chunk = chunk.max(1);
    let mut frames = Vec::with_capacity(body.len().div_ceil(chunk));
    let mut offset = 0;
    while offset < body.len() {
        let end = (offset + chunk).min(body.len());
        frames.push(Ok::<_, BoxError>(Frame::data(body.slice(offset..end))));
        offset = end;
    }
    BodyExt::boxed(StreamBody::new(futures_util::stream::iter(frames)))
}

fn resolve_method(method: &HttpMethod) -> Result<Method, BuildError> {
    match method {
        HttpMethod::Get => Ok(Method::GET),
        HttpMethod::Post => Ok(Method::POST),
        HttpMethod::Put => Ok(Method::PUT),
        HttpMethod::Patch => Ok(Method::PATCH),
        HttpMethod::Delete => Ok(Method::DELETE),
        HttpMethod::Custom(verb) => {
            Method::from_bytes(verb.as_bytes()).map_err(|_| BuildError::InvalidMethod {
                method: verb.clone(),
            })
        }
    }
}

/// Credentials for this exchange: explicitly supplied by the phase
/// (authenticate), or expanded from the section's templates.
fn resolve_credentials(
    section: &SectionConfig,
    state: &dyn PipelineState,
    explicit: Option<(&str, &str)>,
) -> Result<Option<(String, String)>, BuildError> {
    if let Some((username, password)) = explicit {
        return Ok(Some((username.to_owned(), password.to_owned())));
    }
    let (Some(username), Some(password)) = (&section.username, &section.password) else {
        return Ok(None);
    };

    let username = expand(username, state, Escape::None)?;
    let password = expand(password, state, Escape::None)?;
    if username.is_empty() {
        return Ok(None);
    }
    Ok(Some((username, password)))
}

fn encode_body(
    section: &SectionConfig,
    codecs: &CodecSet,
    state: &dyn PipelineState,
) -> Result<Bytes, BuildError> {
    match section.body {
        BodyType::None => Ok(Bytes::new()),
        BodyType::CustomTemplate => {
            let template = section.data.as_deref().unwrap_or_default();
            let expanded = expand(template, state, Escape::None)?;
            Ok(Bytes::from(expanded))
        }
        BodyType::CustomLiteral => Ok(Bytes::from(
            section.data.clone().unwrap_or_default(),
        )),
        // Plain request bodies carry the expanded data template verbatim.
        BodyType::Plain => match &section.data {
            Some(template) => Ok(Bytes::from(expand(template, state, Escape::None)?)),
            None => Ok(Bytes::new()),
        },
        body => match codecs.encoder(body) {
            Some(encoder) => Ok(encoder.encode(state)?),
            None => Err(BuildError::Encode {
                source: CodecError::Malformed {
                    message: format!("no encoder registered for body type {body:?}"),
                },
            }),
        },
    }
}

/// Builds the fully configured request for one exchange: expanded URI,
/// credentials, encoded body, and transfer settings. Touches only the
/// prepared output, never the pipeline state.
pub(crate) fn build_request(
    section: &SectionConfig,
    codecs: &CodecSet,
    state: &dyn PipelineState,
    explicit_credentials: Option<(&str, &str)>,
) -> Result<PreparedRequest, BuildError> {
    let uri_text = expand(&section.uri, state, Escape::Uri)?;
    if uri_text.is_empty() {
        return Err(BuildError::EmptyUri);
    }
    let uri: Uri = uri_text
        .parse()
        .map_err(|_| BuildError::InvalidUri { uri: uri_text })?;

    let method = resolve_method(&section.method)?;
    let body = encode_body(section, codecs, state)?;

    let mut builder = Request::builder().method(method).uri(uri);
    if !body.is_empty() {
        if let Some(content_type) = &section.body_content_type {
            let value = HeaderValue::from_str(content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
            builder = builder.header(CONTENT_TYPE, value);
        }
    }

    if section.auth.needs_credentials() {
        match resolve_credentials(section, state, explicit_credentials)? {
            Some((username, password)) => {
                let mut value = match section.auth {
                    AuthKind::Basic => {
                        let token = BASE64.encode(format!("{username}:{password}"));
                        HeaderValue::from_str(&format!("Basic {token}"))
                    }
                    AuthKind::Bearer => HeaderValue::from_str(&format!("Bearer {password}")),
                    // Remaining modes are rejected by the resolver.
                    _ => HeaderValue::from_str(""),
                }
                .map_err(|_| BuildError::MissingCredential { name: "password" })?;
                value.set_sensitive(true);
                builder = builder.header(AUTHORIZATION, value);
            }
            None if section.require_auth => {
                return Err(BuildError::MissingCredential { name: "username" });
            }
            None => {}
        }
    }

    let request_body = if section.chunk > 0 && !body.is_empty() {
        chunked_req_body(body, section.chunk)
    } else {
        buffered_req_body(body)
    };
    let request = builder
        .body(request_body)
        .map_err(|source| BuildError::Request { source })?;

    Ok(PreparedRequest {
        request,
        timeout: section.timeout,
    })
}
