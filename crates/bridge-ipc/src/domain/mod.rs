//! Domain layer: wire envelopes, errors, configuration and policies.

pub mod config;
pub mod envelope;
pub mod error;
pub mod request_id;
pub mod retry_policy;
pub mod types;

pub use config::*;
pub use envelope::*;
pub use error::*;
pub use request_id::*;
pub use retry_policy::*;
pub use types::*;
