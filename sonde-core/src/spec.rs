//! Typed views over the raw API tree.
//!
//! Each node kind has a fixed set of allowed and required keys. A raw mapping
//! is validated against them first and then converted into the kind's
//! accessor struct, so the rest of the engine never indexes raw mappings.
use serde_json::{Map, Value};
use std::path::Path;
use tracing::*;

use crate::{Error, Result};

pub const ASSERT: &str = "assert";
pub const BODY: &str = "body";
pub const DELAY: &str = "delay";
pub const ENDPOINTS: &str = "endpoints";
pub const HEADERS: &str = "headers";
pub const METHOD: &str = "method";
pub const NAME: &str = "name";
pub const PARAMS: &str = "params";
pub const PATH: &str = "path";
pub const REQUESTS: &str = "requests";
pub const TESTS: &str = "tests";
pub const VARS: &str = "vars";

/// Key rules for one kind of node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeKind {
    pub scope: &'static str,
    pub allowed: &'static [&'static str],
    pub required: &'static [&'static str],
}

const ENDPOINT_KEYS: &[&str] = &[
    ENDPOINTS, HEADERS, NAME, PARAMS, PATH, REQUESTS, DELAY, VARS,
];

pub const ROOT: NodeKind = NodeKind {
    scope: "root",
    allowed: ENDPOINT_KEYS,
    required: &[],
};

pub const ENDPOINT: NodeKind = NodeKind {
    scope: "endpoint",
    allowed: ENDPOINT_KEYS,
    required: &[NAME],
};

pub const REQUEST: NodeKind = NodeKind {
    scope: "request",
    allowed: &[BODY, HEADERS, METHOD, NAME, PARAMS, PATH, TESTS, VARS],
    required: &[NAME],
};

pub const TEST: NodeKind = NodeKind {
    scope: "test",
    allowed: &[ASSERT, NAME],
    required: &[ASSERT, NAME],
};

/// Check that the keys of `spec` are allowed and complete for `kind`.
///
/// # Errors
///
/// [`Error::InvalidKeys`] naming every unknown key, or
/// [`Error::MissingKeys`] naming every absent required key.
pub fn validate_keys(kind: &NodeKind, spec: &Map<String, Value>) -> Result<()> {
    let invalid: Vec<String> = spec
        .keys()
        .filter(|key| !kind.allowed.contains(&key.as_str()))
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(Error::InvalidKeys {
            scope: kind.scope.to_string(),
            keys: invalid,
        });
    }

    let missing: Vec<String> = kind
        .required
        .iter()
        .filter(|key| !spec.contains_key(**key))
        .map(|key| key.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingKeys {
            scope: kind.scope.to_string(),
            keys: missing,
        });
    }

    Ok(())
}

/// Takes typed values out of a validated mapping.
struct Fields {
    scope: &'static str,
    spec: Map<String, Value>,
}

impl Fields {
    fn new(kind: &NodeKind, value: Value) -> Result<Fields> {
        let spec = match value {
            Value::Object(spec) => spec,
            other => {
                return Err(Error::InvalidValue {
                    scope: kind.scope.to_string(),
                    key: kind.scope.to_string(),
                    reason: format!("expected a mapping, got {other}"),
                })
            }
        };
        validate_keys(kind, &spec)?;
        Ok(Fields {
            scope: kind.scope,
            spec,
        })
    }

    fn invalid(&self, key: &str, expected: &str, got: &Value) -> Error {
        Error::InvalidValue {
            scope: self.scope.to_string(),
            key: key.to_string(),
            reason: format!("expected {expected}, got {got}"),
        }
    }

    fn optional(&mut self, key: &str) -> Option<Value> {
        self.spec.remove(key).filter(|value| !value.is_null())
    }

    fn string(&mut self, key: &str) -> Result<String> {
        match self.spec.remove(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(self.invalid(key, "a string", &other)),
            None => Err(Error::MissingKey {
                scope: self.scope.to_string(),
                key: key.to_string(),
            }),
        }
    }

    fn optional_string(&mut self, key: &str) -> Result<Option<String>> {
        match self.optional(key) {
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(self.invalid(key, "a string", &other)),
            None => Ok(None),
        }
    }

    fn mapping(&mut self, key: &str) -> Result<Map<String, Value>> {
        match self.optional(key) {
            Some(Value::Object(map)) => Ok(map),
            Some(other) => Err(self.invalid(key, "a mapping", &other)),
            None => Ok(Map::new()),
        }
    }

    fn sequence(&mut self, key: &str) -> Result<Vec<Value>> {
        match self.optional(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(self.invalid(key, "a sequence", &other)),
            None => Ok(Vec::new()),
        }
    }

    fn millis(&mut self, key: &str) -> Result<Option<u64>> {
        match self.optional(key) {
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.invalid(key, "a non-negative integer", &value)),
            None => Ok(None),
        }
    }
}

/// Accessors for the root node and endpoint nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointSpec {
    pub name: Option<String>,
    pub path: Option<Value>,
    pub headers: Map<String, Value>,
    pub params: Map<String, Value>,
    /// Milliseconds to wait before each request of this endpoint.
    pub delay: Option<u64>,
    pub vars: Map<String, Value>,
    pub endpoints: Vec<Value>,
    pub requests: Vec<Value>,
}

impl EndpointSpec {
    pub fn from_value(kind: &NodeKind, value: Value) -> Result<EndpointSpec> {
        let mut fields = Fields::new(kind, value)?;
        Ok(EndpointSpec {
            name: fields.optional_string(NAME)?,
            path: fields.optional(PATH),
            headers: fields.mapping(HEADERS)?,
            params: fields.mapping(PARAMS)?,
            delay: fields.millis(DELAY)?,
            vars: fields.mapping(VARS)?,
            endpoints: fields.sequence(ENDPOINTS)?,
            requests: fields.sequence(REQUESTS)?,
        })
    }
}

/// Accessors for a request node.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub name: String,
    /// Raw method; validated when the request is executed.
    pub method: Option<Value>,
    pub path: Option<Value>,
    pub headers: Map<String, Value>,
    pub params: Map<String, Value>,
    pub body: Option<Value>,
    pub tests: Vec<TestSpec>,
    pub vars: Map<String, Value>,
}

impl RequestSpec {
    pub fn from_value(value: Value) -> Result<RequestSpec> {
        let mut fields = Fields::new(&REQUEST, value)?;
        Ok(RequestSpec {
            name: fields.string(NAME)?,
            method: fields.optional(METHOD),
            path: fields.optional(PATH),
            headers: fields.mapping(HEADERS)?,
            params: fields.mapping(PARAMS)?,
            body: fields.optional(BODY),
            tests: fields
                .sequence(TESTS)?
                .into_iter()
                .map(TestSpec::from_value)
                .collect::<Result<_>>()?,
            vars: fields.mapping(VARS)?,
        })
    }
}

/// Accessors for a test node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSpec {
    pub name: String,
    pub assertion: String,
}

impl TestSpec {
    pub fn from_value(value: Value) -> Result<TestSpec> {
        let mut fields = Fields::new(&TEST, value)?;
        Ok(TestSpec {
            name: fields.string(NAME)?,
            assertion: fields.string(ASSERT)?,
        })
    }
}

/// Load a raw API tree from a YAML file, or JSON when the extension is `json`.
pub fn load_from(path: &Path) -> Result<Value> {
    let buf = std::fs::read_to_string(path)
        .map_err(|e| Error::LoadError(format!("{}: {e}", path.display())))?;

    let value: Value = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&buf).map_err(|e| Error::LoadError(format!("{}: {e}", path.display())))?
    } else {
        serde_yaml::from_str(&buf).map_err(|e| Error::LoadError(format!("{}: {e}", path.display())))?
    };
    debug!("API tree loaded from {}", path.display());

    Ok(value)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn unknown_key_is_named_with_scope() {
        let err = RequestSpec::from_value(json!({"name": "list", "foo": 1})).unwrap_err();
        match err {
            Error::InvalidKeys { scope, keys } => {
                assert_eq!(scope, "request");
                assert_eq!(keys, vec!["foo".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_required_name_is_reported() {
        let err = RequestSpec::from_value(json!({"path": "/users"})).unwrap_err();
        match err {
            Error::MissingKeys { scope, keys } => {
                assert_eq!(scope, "request");
                assert_eq!(keys, vec!["name".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn root_requires_nothing() -> eyre::Result<()> {
        let spec = EndpointSpec::from_value(&ROOT, json!({"path": "http://localhost"}))?;
        assert_eq!(spec.name, None);
        assert_eq!(spec.path, Some(json!("http://localhost")));
        Ok(())
    }

    #[test]
    fn endpoint_requires_name() {
        let err = EndpointSpec::from_value(&ENDPOINT, json!({"path": "/x"})).unwrap_err();
        assert!(matches!(err, Error::MissingKeys { ref scope, .. } if scope == "endpoint"));
    }

    #[test]
    fn test_nodes_are_validated_with_their_request() {
        let err = RequestSpec::from_value(json!({
            "name": "list",
            "tests": [{"name": "ok"}],
        }))
        .unwrap_err();
        match err {
            Error::MissingKeys { scope, keys } => {
                assert_eq!(scope, "test");
                assert_eq!(keys, vec!["assert".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn wrongly_typed_value_is_rejected() {
        let err = RequestSpec::from_value(json!({"name": "list", "headers": [1]})).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { ref key, .. } if key == "headers"));
    }

    #[test]
    fn request_accessors() -> eyre::Result<()> {
        let spec = RequestSpec::from_value(json!({
            "name": "create",
            "method": "post",
            "path": "users",
            "headers": {"X-Trace": "1"},
            "body": {"name": "${user}"},
            "tests": [{"name": "created", "assert": "${{ response.status_code == 201 }}"}],
            "vars": {"id": "${response.json.id}"},
        }))?;
        assert_eq!(spec.name, "create");
        assert_eq!(spec.method, Some(json!("post")));
        assert_eq!(spec.params, Map::new());
        assert_eq!(
            spec.tests,
            vec![TestSpec {
                name: "created".into(),
                assertion: "${{ response.status_code == 201 }}".into(),
            }]
        );
        Ok(())
    }

    #[test]
    fn delay_must_be_an_integer() {
        let err = EndpointSpec::from_value(&ROOT, json!({"delay": "soon"})).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { ref key, .. } if key == "delay"));
    }
}
