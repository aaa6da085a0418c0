//! `restgate` delegates AAA pipeline decisions to remote REST APIs over
//! HTTP/1.1 + HTTP/2.
//!
//! Each pipeline phase (authorize, authenticate, accounting, post-auth)
//! can be pointed at its own endpoint. A phase invocation expands the
//! section's URI and body templates against the request's attributes,
//! performs the exchange on a pooled connection handle, decodes any
//! attribute updates from the response, and classifies the HTTP status
//! into a pipeline outcome.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use restgate::prelude::{
//!     AttributeList, ModuleSettings, Outcome, RestModule, SectionSettings, Worker,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ModuleSettings {
//!         authorize: Some(SectionSettings {
//!             uri: "https://api.example.com/user/%{User-Name}".to_owned(),
//!             ..SectionSettings::default()
//!         }),
//!         ..ModuleSettings::default()
//!     };
//!
//!     let module = Arc::new(RestModule::resolve(&settings)?);
//!     let worker = Worker::new(module, 8);
//!
//!     let mut state: AttributeList = [("User-Name", "bob")].into_iter().collect();
//!     let outcome = worker.authorize(&mut state).await;
//!     assert_ne!(outcome, Outcome::Fail);
//!     Ok(())
//! }
//! ```
//!
//! # Recommended Defaults
//!
//! - One `Worker` per worker thread; share the resolved `RestModule`.
//! - Size the handle pool to the maximum concurrent invocations a worker
//!   is expected to carry.
//! - Keep `check_cert` enabled outside of test environments.

mod classify;
mod codec;
mod config;
mod driver;
mod error;
mod module;
mod outcome;
mod pool;
mod proxy;
mod request;
mod state;
mod template;
mod tls;
mod transport;

pub use crate::classify::{DecodeOutcome, classify, decode_wanted, error_logged};
pub use crate::codec::{BodyDecoder, BodyEncoder, CodecSet, FormCodec, JsonCodec, PlainCodec};
pub use crate::config::{
    AuthKind, BodyType, HttpMethod, ModuleSettings, Phase, SectionConfig, SectionSettings,
    TlsSettings,
};
pub use crate::error::{
    BuildError, CodecError, ConfigError, TemplateError, TransportError, TransportErrorKind,
};
pub use crate::module::{RestModule, Worker};
pub use crate::outcome::Outcome;
pub use crate::pool::{Handle, HandlePool};
pub use crate::state::{
    AttributeList, CERT_CHAIN_DEPTH_ATTR, CERT_FINGERPRINT_ATTR, PLAIN_BODY_ATTR, PipelineState,
    STATUS_CODE_ATTR, USER_NAME_ATTR, USER_PASSWORD_ATTR,
};

pub mod prelude {
    pub use crate::{
        AttributeList, AuthKind, BodyType, CodecSet, ConfigError, HttpMethod, ModuleSettings,
        Outcome, Phase, PipelineState, RestModule, SectionSettings, TlsSettings, Worker,
    };
}
