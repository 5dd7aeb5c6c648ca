//! # Integration Flows
//!
//! End-to-end behavior of `BridgeClient` against the scripted backend.

pub mod flows;
pub mod queue_flows;
