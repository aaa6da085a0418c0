use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use http::Uri;
use http::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use tracing::{Instrument, debug, info_span, warn};

use crate::classify::{DecodeOutcome, classify, decode_wanted, error_logged};
use crate::codec::CodecSet;
use crate::config::{
    ModuleSettings, Phase, SectionConfig, SectionSettings, body_type_from_content_type,
    resolve_section,
};
use crate::driver::enqueue;
use crate::error::ConfigError;
use crate::outcome::Outcome;
use crate::pool::{CompletedExchange, HandlePool, Leased};
use crate::request::build_request;
use crate::state::{
    CERT_CHAIN_DEPTH_ATTR, CERT_FINGERPRINT_ATTR, PipelineState, STATUS_CODE_ATTR, USER_NAME_ATTR,
    USER_PASSWORD_ATTR,
};
use crate::transport::SectionClient;

const PHASES: [Phase; 4] = [
    Phase::Authorize,
    Phase::Authenticate,
    Phase::Accounting,
    Phase::PostAuth,
];

const fn phase_index(phase: Phase) -> usize {
    match phase {
        Phase::Authorize => 0,
        Phase::Authenticate => 1,
        Phase::Accounting => 2,
        Phase::PostAuth => 3,
    }
}

/// Characters of the response body surfaced to the diagnostic log when a
/// response classifies as an error.
const BODY_EXCERPT_LIMIT: usize = 512;

/// Resolved module instance: validated per-phase sections plus the
/// module-level proxy. Built once at startup, shared read-only across
/// workers.
pub struct RestModule {
    connect_proxy: Option<Uri>,
    sections: [Option<SectionConfig>; 4],
}

impl RestModule {
    /// Validates every configured section up front. A phase with no
    /// section simply stays inactive; a section that fails validation
    /// blocks the whole module from loading.
    pub fn resolve(settings: &ModuleSettings) -> Result<Self, ConfigError> {
        let connect_proxy = settings
            .connect_proxy
            .as_deref()
            .map(|proxy| {
                proxy.parse::<Uri>().map_err(|_| ConfigError::InvalidProxy {
                    proxy: proxy.to_owned(),
                })
            })
            .transpose()?;

        fn resolve_phase(
            phase: Phase,
            section: &Option<SectionSettings>,
        ) -> Result<Option<SectionConfig>, ConfigError> {
            section
                .as_ref()
                .map(|settings| resolve_section(phase, settings))
                .transpose()
        }

        Ok(Self {
            connect_proxy,
            sections: [
                resolve_phase(Phase::Authorize, &settings.authorize)?,
                resolve_phase(Phase::Authenticate, &settings.authenticate)?,
                resolve_phase(Phase::Accounting, &settings.accounting)?,
                resolve_phase(Phase::PostAuth, &settings.post_auth)?,
            ],
        })
    }

    pub fn section(&self, phase: Phase) -> Option<&SectionConfig> {
        self.sections[phase_index(phase)].as_ref()
    }

    pub fn connect_proxy(&self) -> Option<&Uri> {
        self.connect_proxy.as_ref()
    }
}

/// Per-thread engine state: one pooled transport per active phase and a
/// bounded pool of exchange handles.
///
/// A worker is confined to the thread that created it; the pipeline
/// creates one per worker thread rather than sharing one behind a lock.
/// The module it was built from is shared.
pub struct Worker {
    module: Arc<RestModule>,
    codecs: Arc<CodecSet>,
    pool: Rc<RefCell<HandlePool>>,
    clients: [Option<SectionClient>; 4],
}

impl Worker {
    pub fn new(module: Arc<RestModule>, pool_capacity: usize) -> Self {
        Self::with_codecs(module, pool_capacity, Arc::new(CodecSet::default()))
    }

    pub fn with_codecs(
        module: Arc<RestModule>,
        pool_capacity: usize,
        codecs: Arc<CodecSet>,
    ) -> Self {
        let clients = PHASES.map(|phase| {
            module
                .section(phase)
                .map(|section| SectionClient::build(section, module.connect_proxy()))
        });
        Self {
            module,
            codecs,
            pool: Rc::new(RefCell::new(HandlePool::new(pool_capacity))),
            clients,
        }
    }

    pub fn idle_handles(&self) -> usize {
        self.pool.borrow().idle()
    }

    pub fn handles_in_use(&self) -> usize {
        self.pool.borrow().in_use()
    }

    /// Drops every idle connection handle. Called on worker shutdown.
    pub fn close(&self) {
        self.pool.borrow_mut().close_all();
    }

    pub async fn authorize(&self, state: &mut dyn PipelineState) -> Outcome {
        self.invoke(Phase::Authorize, state, None).await
    }

    /// Delegates the authentication decision. The user's credentials are
    /// attached to the request, so both attributes must be present before
    /// anything is leased or sent.
    pub async fn authenticate(&self, state: &mut dyn PipelineState) -> Outcome {
        if self.module.section(Phase::Authenticate).is_none() {
            return Outcome::Noop;
        }

        let username = state.get(USER_NAME_ATTR).map(ToOwned::to_owned);
        let password = state.get(USER_PASSWORD_ATTR).map(ToOwned::to_owned);
        let (Some(username), Some(password)) = (username, password) else {
            warn!("cannot authenticate without both User-Name and User-Password");
            return Outcome::Invalid;
        };

        self.invoke(Phase::Authenticate, state, Some((username, password)))
            .await
    }

    pub async fn accounting(&self, state: &mut dyn PipelineState) -> Outcome {
        self.invoke(Phase::Accounting, state, None).await
    }

    pub async fn post_auth(&self, state: &mut dyn PipelineState) -> Outcome {
        self.invoke(Phase::PostAuth, state, None).await
    }

    async fn invoke(
        &self,
        phase: Phase,
        state: &mut dyn PipelineState,
        credentials: Option<(String, String)>,
    ) -> Outcome {
        let Some(section) = self.module.section(phase) else {
            return Outcome::Noop;
        };
        let Some(client) = &self.clients[phase_index(phase)] else {
            return Outcome::Noop;
        };

        let span = info_span!("rest", phase = phase.as_str());
        async {
            let credentials = credentials
                .as_ref()
                .map(|(username, password)| (username.as_str(), password.as_str()));
            let prepared = match build_request(section, &self.codecs, state, credentials) {
                Ok(prepared) => prepared,
                Err(error) => {
                    warn!(%error, "failed to build request");
                    return Outcome::Invalid;
                }
            };

            let mut leased = match Leased::acquire(&self.pool) {
                Ok(leased) => leased,
                Err(error) => {
                    warn!(%error, "no connection handle available");
                    return Outcome::Fail;
                }
            };

            let outstanding = match enqueue(client, leased.handle(), prepared) {
                Ok(outstanding) => outstanding,
                Err(error) => {
                    warn!(%error, "failed to enqueue exchange");
                    return Outcome::Fail;
                }
            };

            match outstanding.await {
                Ok(completed) => {
                    leased.handle_mut().complete(completed);
                    match leased.handle().exchange() {
                        Some(exchange) => self.finish(phase, section, exchange, state),
                        None => Outcome::Fail,
                    }
                }
                Err(error) => {
                    // No response was produced; the status attribute still
                    // gets written so policies can test for it.
                    state.set(STATUS_CODE_ATTR, "0".to_owned());
                    warn!(%error, "http exchange failed");
                    Outcome::Fail
                }
            }
        }
        .instrument(span)
        .await
    }

    fn finish(
        &self,
        phase: Phase,
        section: &SectionConfig,
        exchange: &CompletedExchange,
        state: &mut dyn PipelineState,
    ) -> Outcome {
        let status = exchange.status;
        state.set(STATUS_CODE_ATTR, status.as_u16().to_string());

        if section.extract_cert_attrs {
            set_cert_attributes(exchange, state);
        }

        let decode = if decode_wanted(phase, status) {
            self.decode_response(section, exchange, state)
        } else {
            DecodeOutcome::NotAttempted
        };

        let outcome = classify(phase, status, decode);
        if error_logged(phase, status, outcome) {
            warn!(
                status = status.as_u16(),
                outcome = %outcome,
                body = %body_excerpt(&exchange.body),
                "server response classified as an error"
            );
        } else {
            debug!(status = status.as_u16(), outcome = %outcome, "exchange classified");
        }
        outcome
    }

    /// Selects a decoder for the response body and applies it. The
    /// section's `force_to` override wins over the response Content-Type;
    /// with neither, decoding is skipped rather than guessed.
    fn decode_response(
        &self,
        section: &SectionConfig,
        exchange: &CompletedExchange,
        state: &mut dyn PipelineState,
    ) -> DecodeOutcome {
        let body_type = section.force_to.or_else(|| {
            exchange
                .headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .and_then(body_type_from_content_type)
        });
        let Some(body_type) = body_type else {
            return DecodeOutcome::NotAttempted;
        };
        let Some(decoder) = self.codecs.decoder(body_type) else {
            debug!(?body_type, "no decoder registered for response body type");
            return DecodeOutcome::NotAttempted;
        };

        match decoder.decode(&exchange.body, state) {
            Ok(0) => DecodeOutcome::Clean,
            Ok(updates) => {
                debug!(updates, "decoded response attribute updates");
                DecodeOutcome::Updated
            }
            Err(error) => {
                warn!(%error, "failed to decode response body");
                DecodeOutcome::Error
            }
        }
    }
}

fn set_cert_attributes(exchange: &CompletedExchange, state: &mut dyn PipelineState) {
    let Some(chain) = &exchange.peer_chain else {
        return;
    };
    let Some(end_entity) = chain.first() else {
        return;
    };

    let digest = Sha256::digest(end_entity);
    let mut fingerprint = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(fingerprint, "{byte:02x}");
    }
    state.set(CERT_FINGERPRINT_ATTR, fingerprint);
    state.set(CERT_CHAIN_DEPTH_ATTR, chain.len().to_string());
}

fn body_excerpt(body: &Bytes) -> String {
    let text = String::from_utf8_lossy(body);
    let mut excerpt = String::new();
    for (count, character) in text.chars().enumerate() {
        if count == BODY_EXCERPT_LIMIT {
            excerpt.push_str("...");
            break;
        }
        excerpt.push(character);
    }
    excerpt
}
