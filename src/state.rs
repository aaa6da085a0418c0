use std::collections::BTreeMap;

/// Name of the result attribute carrying the final HTTP status code.
/// Written on every completed exchange, including failed ones (0 when the
/// transfer never produced a response).
pub const STATUS_CODE_ATTR: &str = "REST-HTTP-Status-Code";

/// Attribute receiving the raw response body when decoding as plain text.
pub const PLAIN_BODY_ATTR: &str = "REST-HTTP-Body";

/// SHA-256 fingerprint of the server's end-entity certificate, written
/// when the section enables certificate attribute extraction.
pub const CERT_FINGERPRINT_ATTR: &str = "REST-TLS-Cert-Fingerprint";

/// Number of certificates the server presented, written alongside the
/// fingerprint.
pub const CERT_CHAIN_DEPTH_ATTR: &str = "REST-TLS-Cert-Chain-Depth";

pub const USER_NAME_ATTR: &str = "User-Name";
pub const USER_PASSWORD_ATTR: &str = "User-Password";

/// Attribute view over the calling pipeline's request state.
///
/// The engine only reads attributes (template expansion, body encoding)
/// and writes decoded result attributes back; storage and lookup rules
/// belong to the pipeline.
pub trait PipelineState {
    fn get(&self, name: &str) -> Option<&str>;

    fn set(&mut self, name: &str, value: String);

    /// Snapshot of all attributes, used by request body encoders.
    fn attributes(&self) -> Vec<(String, String)>;
}

/// Simple owned attribute store, sufficient for tests and for pipelines
/// without their own attribute machinery.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeList {
    pairs: BTreeMap<String, String>,
}

impl AttributeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

impl PipelineState for AttributeList {
    fn get(&self, name: &str) -> Option<&str> {
        self.pairs.get(name).map(String::as_str)
    }

    fn set(&mut self, name: &str, value: String) {
        self.pairs.insert(name.to_owned(), value);
    }

    fn attributes(&self) -> Vec<(String, String)> {
        self.pairs
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl<N, V> FromIterator<(N, V)> for AttributeList
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(pairs: I) -> Self {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}
