//! # Webbridge Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/
//! │   ├── harness.rs      # Scripted in-memory backend
//! │   └── integration/    # End-to-end client flows
//! │       ├── flows.rs        # direct path, inbound handlers, credentials
//! │       └── queue_flows.rs  # priority queue under load
//! └── benches/
//!     └── bridge_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p bridge-tests
//!
//! # By category
//! cargo test -p bridge-tests integration::flows
//! cargo test -p bridge-tests integration::queue_flows
//!
//! # Benchmarks
//! cargo bench -p bridge-tests
//! ```

pub mod harness;
pub mod integration;
