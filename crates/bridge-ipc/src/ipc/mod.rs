//! IPC layer: correlation, transport binding, inbound dispatch, retry, timeouts.

pub mod credentials;
pub mod handlers;
pub mod pending;
pub mod retry;
pub mod timeout;
pub mod transport;

pub use credentials::{CredentialProvider, StaticCredentials};
pub use handlers::{HandlerRegistry, RequestHandler};
pub use pending::{CallOutcome, CorrelationTable, PendingSnapshot};
pub use retry::RetryController;
pub use timeout::{CallState, Settled, TimedCall};
pub use transport::Transport;
