use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::SectionConfig;
use crate::error::{BoxError, TransportErrorKind};
use crate::proxy::ProxyConnector;
use crate::tls::RecordedChain;

pub(crate) type ReqBody = BoxBody<Bytes, BoxError>;

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 8;

/// Pooled transport for one section, owned by one worker.
///
/// Connection reuse across exchanges happens here, inside the transport
/// library's own pool, while the handle pool above it bounds how many
/// exchanges a worker keeps in flight.
#[derive(Clone)]
pub(crate) struct SectionClient {
    client: Client<HttpsConnector<ProxyConnector>, ReqBody>,
    recorded_chain: Option<RecordedChain>,
}

impl SectionClient {
    /// Builds the hyper client for a section, applying its TLS policy
    /// and proxy selection (section proxy first, then the module-level
    /// connect proxy).
    pub(crate) fn build(section: &SectionConfig, connect_proxy: Option<&Uri>) -> Self {
        let proxy_uri = section.proxy.clone().or_else(|| connect_proxy.cloned());
        let connector = ProxyConnector::new(proxy_uri);
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(section.tls.config.clone())
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(connector);
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build(https);
        Self {
            client,
            recorded_chain: section.tls.recorded_chain.clone(),
        }
    }

    pub(crate) async fn request(
        &self,
        request: Request<ReqBody>,
    ) -> Result<Response<Incoming>, hyper_util::client::legacy::Error> {
        self.client.request(request).await
    }

    /// Last peer chain seen by this section's verifier. Snapshot taken
    /// right after an exchange completes.
    pub(crate) fn snapshot_peer_chain(&self) -> Option<Vec<Vec<u8>>> {
        let slot = self.recorded_chain.as_ref()?;
        let guard = match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone()
    }
}

/// Maps the transport library's opaque error onto the coarse kinds the
/// diagnostic log distinguishes.
pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    if error.is_connect() {
        let text = error.to_string().to_ascii_lowercase();
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls")
            || text.contains("certificate")
            || text.contains("handshake")
            || text.contains("alert")
        {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }

    let text = error.to_string().to_ascii_lowercase();
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}
