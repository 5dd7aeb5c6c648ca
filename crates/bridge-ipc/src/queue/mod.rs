//! Priority request queue with bounded admission and per-request retry.

pub mod scheduler;

pub use scheduler::{QueueTicket, RequestExecutor, RequestQueue};
