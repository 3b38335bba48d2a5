//! # sonde
//!
//! sonde runs the requests of a declarative API tree one after another,
//! threads variables from response to request, checks each response with
//! assertion expressions, and masks sensitive fields before printing.
//!
//! ## Quick Start
//!
//! ```yaml
//! # api.yaml
//! path: ${BASE_URL}
//! headers:
//!   Authorization: Bearer ${API_TOKEN}
//! endpoints:
//!   - name: users
//!     path: /users
//!     requests:
//!       - name: create
//!         method: post
//!         body: {name: ada}
//!         vars:
//!           user_id: ${response.json.id}
//!         tests:
//!           - name: created
//!             assert: ${{ response.status_code == 201 }}
//!       - name: get
//!         path: ${user_id}
//! ```
//!
//! ```bash
//! sonde run --spec api.yaml --capture-http
//! sonde ls
//! ```
//!
//! `sonde.toml` in the current directory, or the file named by
//! `SONDE_CONFIG`, sets the default tree path and the fields to mask.

mod app;

// Re-export error handling crates for user convenience
pub use eyre;

pub use app::{App, Color};

// Re-export core functionality
pub use sonde_core::{
    config::Config,
    http,
    reporter::{ListReporter, NullReporter, Reporter, ReporterType},
    runner::{ResultBundle, Runner, Summary},
    ApiTree,
};
