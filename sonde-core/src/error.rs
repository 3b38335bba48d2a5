use itertools::Itertools;

use crate::{http, template::TemplateError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Occurs when `sonde.toml` or the API tree file fails to load.
    #[error("failed to load {0}")]
    LoadError(String),
    /// Occurs when a node carries keys its kind does not accept.
    #[error("invalid key(s) {} in {scope} scope", quoted(.keys))]
    InvalidKeys { scope: String, keys: Vec<String> },
    /// Occurs when a node lacks keys its kind requires.
    #[error("missing required key(s) {} in {scope} scope", quoted(.keys))]
    MissingKeys { scope: String, keys: Vec<String> },
    /// Occurs when a typed accessor asks for a key the node does not have.
    #[error("missing key \"{key}\" in {scope} scope")]
    MissingKey { scope: String, key: String },
    /// Occurs when a key holds a value of the wrong shape.
    #[error("invalid value for \"{key}\" in {scope} scope: {reason}")]
    InvalidValue {
        scope: String,
        key: String,
        reason: String,
    },
    /// Occurs when the configured method is outside the allowed set.
    #[error("HTTP method not allowed: {method}. Allowed methods: {}", .allowed.iter().join(", "))]
    HttpMethodNotAllowed {
        method: String,
        allowed: Vec<http::Method>,
    },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Http(#[from] http::Error),
}

fn quoted(keys: &[String]) -> String {
    keys.iter().map(|k| format!("\"{k}\"")).join(", ")
}
