use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::config::BodyType;
use crate::error::CodecError;
use crate::state::{PLAIN_BODY_ATTR, PipelineState};

/// Serializes pipeline attributes into a request body.
pub trait BodyEncoder: Send + Sync {
    fn encode(&self, state: &dyn PipelineState) -> Result<Bytes, CodecError>;
}

/// Parses a response body into pipeline attribute updates.
///
/// Returns the number of attributes written. Zero updates on a 2xx
/// response classifies as `ok`, one or more as `updated`.
pub trait BodyDecoder: Send + Sync {
    fn decode(&self, body: &[u8], state: &mut dyn PipelineState) -> Result<usize, CodecError>;
}

/// JSON wire format: a flat object of attribute name to scalar or array.
pub struct JsonCodec;

impl BodyEncoder for JsonCodec {
    fn encode(&self, state: &dyn PipelineState) -> Result<Bytes, CodecError> {
        let object: serde_json::Map<String, Value> = state
            .attributes()
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();
        let encoded = serde_json::to_vec(&Value::Object(object))?;
        Ok(Bytes::from(encoded))
    }
}

impl BodyDecoder for JsonCodec {
    fn decode(&self, body: &[u8], state: &mut dyn PipelineState) -> Result<usize, CodecError> {
        if body.is_empty() {
            return Ok(0);
        }

        let parsed: Value = serde_json::from_slice(body)?;
        let Value::Object(object) = parsed else {
            return Err(CodecError::Malformed {
                message: "expected a json object of attribute updates".to_owned(),
            });
        };

        let mut updates = 0;
        for (name, value) in object {
            match value {
                Value::Array(items) => {
                    for item in items {
                        if let Some(text) = scalar_to_text(&item) {
                            state.set(&name, text);
                            updates += 1;
                        }
                    }
                }
                other => {
                    if let Some(text) = scalar_to_text(&other) {
                        state.set(&name, text);
                        updates += 1;
                    }
                }
            }
        }
        Ok(updates)
    }
}

fn scalar_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// `application/x-www-form-urlencoded` pairs, one per attribute.
pub struct FormCodec;

impl BodyEncoder for FormCodec {
    fn encode(&self, state: &dyn PipelineState) -> Result<Bytes, CodecError> {
        let pairs = state.attributes();
        let encoded = serde_urlencoded::to_string(&pairs)?;
        Ok(Bytes::from(encoded))
    }
}

impl BodyDecoder for FormCodec {
    fn decode(&self, body: &[u8], state: &mut dyn PipelineState) -> Result<usize, CodecError> {
        let text = std::str::from_utf8(body).map_err(|_| CodecError::Malformed {
            message: "form body is not valid utf-8".to_owned(),
        })?;

        let mut updates = 0;
        for (name, value) in url::form_urlencoded::parse(text.as_bytes()) {
            if name.is_empty() {
                continue;
            }
            state.set(&name, value.into_owned());
            updates += 1;
        }
        Ok(updates)
    }
}

/// Response-only decoder copying the raw body into a single attribute.
pub struct PlainCodec;

impl BodyDecoder for PlainCodec {
    fn decode(&self, body: &[u8], state: &mut dyn PipelineState) -> Result<usize, CodecError> {
        if body.is_empty() {
            return Ok(0);
        }
        state.set(
            PLAIN_BODY_ATTR,
            String::from_utf8_lossy(body).into_owned(),
        );
        Ok(1)
    }
}

/// Registry of encoders and decoders keyed by body type. The engine only
/// invokes codecs; wire formats beyond the defaults are supplied by the
/// embedding pipeline.
pub struct CodecSet {
    encoders: BTreeMap<BodyType, Arc<dyn BodyEncoder>>,
    decoders: BTreeMap<BodyType, Arc<dyn BodyDecoder>>,
}

impl CodecSet {
    pub fn empty() -> Self {
        Self {
            encoders: BTreeMap::new(),
            decoders: BTreeMap::new(),
        }
    }

    pub fn register_encoder(&mut self, body: BodyType, encoder: Arc<dyn BodyEncoder>) {
        self.encoders.insert(body, encoder);
    }

    pub fn register_decoder(&mut self, body: BodyType, decoder: Arc<dyn BodyDecoder>) {
        self.decoders.insert(body, decoder);
    }

    pub(crate) fn encoder(&self, body: BodyType) -> Option<&Arc<dyn BodyEncoder>> {
        self.encoders.get(&body)
    }

    pub(crate) fn decoder(&self, body: BodyType) -> Option<&Arc<dyn BodyDecoder>> {
        self.decoders.get(&body)
    }
}

impl Default for CodecSet {
    fn default() -> Self {
        let mut set = Self::empty();
        set.register_encoder(BodyType::Json, Arc::new(JsonCodec));
        set.register_encoder(BodyType::Post, Arc::new(FormCodec));
        set.register_decoder(BodyType::Json, Arc::new(JsonCodec));
        set.register_decoder(BodyType::Post, Arc::new(FormCodec));
        set.register_decoder(BodyType::Plain, Arc::new(PlainCodec));
        set
    }
}
