//! # Sonde Core
//!
//! Core functionality for sonde, a declarative WebAPI request runner.
//!
//! This crate provides:
//! - Layered variable namespaces and `${...}` template resolution
//! - A small expression language for assertions
//! - The API tree, built from a YAML or JSON file
//! - The request runner, HTTP transport and sensitive data masking
//! - Test reporting infrastructure and configuration
//!
//! ## Architecture (block diagram)
//!
//! ```text
//! +---------------------+      +---------------------+      +---------------------+
//! | api.yaml (spec)     | ---> | tree (ApiTree)      | ---> | runner              |
//! | endpoints/requests  |      | + namespaces        |      | one request at once |
//! +---------------------+      +---------------------+      +---------------------+
//!                                        ^                       |    |    |
//!                                        | bind vars             |    |    v
//! +---------------------+                |                       |    | +-----------------+
//! | template + expr     | <--------------+-----------------------+    | | http::Transport |
//! | ${path} ${{ expr }} |                                             | | reqwest Client  |
//! +---------------------+                                             | +-----------------+
//!                                                                     v
//! +---------------------+      +---------------------+      +---------------------+
//! | sonde.toml (config) | ---> | masking (Redactor)  | ---> | reporter (output)   |
//! | [redact] fields     |      | after tests ran     |      | List/Null           |
//! +---------------------+      +---------------------+      +---------------------+
//! ```
//!
//! Most users should use the `sonde` binary rather than this crate directly.

pub mod assertion;
pub mod config;
pub mod error;
pub mod expr;
pub mod http;
pub mod masking;
pub mod namespace;
pub mod reporter;
pub mod runner;
pub mod spec;
pub mod template;
pub mod tree;

// Re-export error handling crates
pub use eyre;

pub use assertion::{TestResult, TestStatus};
pub use config::Config;
pub use error::{Error, Result};
pub use reporter::{ListReporter, NullReporter, Reporter, ReporterType};
pub use runner::{ResultBundle, Runner, Summary};
pub use tree::ApiTree;
