//! The API tree built from a configuration file.
//!
//! Nodes are stored flat: endpoints in an arena with parent links, requests
//! in the order they execute. An endpoint's own requests come first, then
//! the requests of its child endpoints, depth first.
//!
//! ```text
//! root (ns 1) --- users (ns 2) --- list      request 0
//!      |                 |-------- create    request 1
//!      |                 `-- admin (ns 3) -- grant   request 2
//!      `-------- health  (ns 4) --- ping      request 3
//! ```
//!
//! Each endpoint owns one namespace layer whose parent is the layer of its
//! parent endpoint. Requests bind their variables into their endpoint's
//! layer, so later requests of the same endpoint and its children can read
//! them.
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::*;

use crate::{
    assertion::TestNode,
    http::{Method, RequestDescriptor},
    namespace::{NamespaceId, Namespaces, RESPONSE},
    spec::{self, EndpointSpec, NodeKind, RequestSpec},
    template::{self, render},
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(usize);

#[derive(Debug)]
pub struct EndpointNode {
    spec: EndpointSpec,
    parent: Option<EndpointId>,
    namespace: NamespaceId,
    full_name: Option<String>,
}

impl EndpointNode {
    pub fn name(&self) -> Option<&str> {
        self.spec.name.as_deref()
    }

    /// Names of this endpoint and its ancestors joined with `::`.
    pub fn full_name(&self) -> Option<&str> {
        self.full_name.as_deref()
    }

    pub fn parent(&self) -> Option<EndpointId> {
        self.parent
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }
}

#[derive(Debug)]
pub struct RequestNode {
    spec: RequestSpec,
    endpoint: EndpointId,
    full_name: String,
    tests: Vec<TestNode>,
}

impl RequestNode {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    /// Raw variable bindings, rebound around every execution.
    pub fn vars(&self) -> &Map<String, Value> {
        &self.spec.vars
    }

    pub fn tests(&self) -> &[TestNode] {
        &self.tests
    }

    /// Configured method, `GET` when absent.
    ///
    /// Checked here rather than at construction, so a request that never
    /// runs is never rejected for its method.
    pub fn http_method(&self) -> Result<Method> {
        match &self.spec.method {
            None => Ok(Method::Get),
            Some(Value::String(method)) => method.parse().map_err(|_| not_allowed(method)),
            Some(other) => Err(not_allowed(&render(other))),
        }
    }

    /// Endpoint path joined with this request's path, resolved.
    pub fn full_url_path(&self, tree: &ApiTree) -> Result<String> {
        let base = tree.endpoint_path(self.endpoint);
        let path = self.spec.path.as_ref().map(render).unwrap_or_default();
        tree.evaluate_str(self.endpoint, &join_urls(&base, &path))
    }

    pub fn headers(&self, tree: &ApiTree) -> Result<Map<String, Value>> {
        let merged = merge(tree.endpoint_headers(self.endpoint), &self.spec.headers);
        tree.evaluate_map(self.endpoint, &merged)
    }

    pub fn params(&self, tree: &ApiTree) -> Result<Map<String, Value>> {
        let merged = merge(tree.endpoint_params(self.endpoint), &self.spec.params);
        tree.evaluate_map(self.endpoint, &merged)
    }

    pub fn body(&self, tree: &ApiTree) -> Result<Option<Value>> {
        let ns = tree.endpoint(self.endpoint).namespace;
        match &self.spec.body {
            Some(body) => Ok(Some(tree.namespaces.evaluate(ns, body)?)),
            None => Ok(None),
        }
    }

    /// Everything but the method and URL, resolved against the current
    /// state of the endpoint's namespace.
    pub fn descriptor(&self, tree: &ApiTree, method: Method, url: String) -> Result<RequestDescriptor> {
        Ok(RequestDescriptor::new(
            method,
            url,
            &self.headers(tree)?,
            &self.params(tree)?,
            self.body(tree)?,
        ))
    }
}

fn not_allowed(method: &str) -> Error {
    Error::HttpMethodNotAllowed {
        method: method.to_uppercase(),
        allowed: Method::ALL.to_vec(),
    }
}

#[derive(Debug)]
pub struct ApiTree {
    namespaces: Namespaces,
    endpoints: Vec<EndpointNode>,
    requests: Vec<RequestNode>,
}

impl ApiTree {
    /// Build the tree from a raw root mapping. `env` seeds the topmost
    /// namespace layer.
    ///
    /// # Errors
    ///
    /// Key validation failures of any node, and template errors from
    /// endpoint variables that can be resolved up front.
    pub fn build(root: Value, env: impl IntoIterator<Item = (String, String)>) -> Result<ApiTree> {
        let mut namespaces = Namespaces::new();
        let environment = namespaces.environment(env);
        let mut tree = ApiTree {
            namespaces,
            endpoints: Vec::new(),
            requests: Vec::new(),
        };
        tree.add_endpoint(&spec::ROOT, root, None, environment)?;
        Ok(tree)
    }

    /// Build the tree with the process environment, after loading `.env`.
    pub fn from_env(root: Value) -> Result<ApiTree> {
        if let Err(e) = dotenv::dotenv() {
            trace!("no .env loaded: {e}");
        }
        ApiTree::build(root, std::env::vars())
    }

    fn add_endpoint(
        &mut self,
        kind: &NodeKind,
        value: Value,
        parent: Option<EndpointId>,
        parent_namespace: NamespaceId,
    ) -> Result<EndpointId> {
        let mut spec = EndpointSpec::from_value(kind, value)?;
        let children = std::mem::take(&mut spec.endpoints);
        let requests = std::mem::take(&mut spec.requests);

        let namespace = self.namespaces.create(Some(parent_namespace));
        self.namespaces
            .update(namespace, &spec.vars, Map::new(), false)?;
        let eager: Map<String, Value> = spec
            .vars
            .iter()
            .filter(|(_, value)| !template::references(value, RESPONSE))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        self.namespaces.update(namespace, &eager, Map::new(), true)?;

        let parent_name = parent.and_then(|p| self.endpoint(p).full_name.clone());
        let full_name = match (parent_name, spec.name.as_deref()) {
            (Some(parent), Some(name)) => Some(format!("{parent}::{name}")),
            (parent, name) => parent.or_else(|| name.map(str::to_string)),
        };

        let id = EndpointId(self.endpoints.len());
        self.endpoints.push(EndpointNode {
            spec,
            parent,
            namespace,
            full_name,
        });

        for request in requests {
            let spec = RequestSpec::from_value(request)?;
            let full_name = match self.endpoint(id).full_name() {
                Some(prefix) => format!("{prefix}::{}", spec.name),
                None => spec.name.clone(),
            };
            let tests = spec
                .tests
                .iter()
                .map(|test| TestNode::new(test.clone(), &full_name))
                .collect();
            self.requests.push(RequestNode {
                spec,
                endpoint: id,
                full_name,
                tests,
            });
        }

        for child in children {
            self.add_endpoint(&spec::ENDPOINT, child, Some(id), namespace)?;
        }

        Ok(id)
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    pub fn namespaces_mut(&mut self) -> &mut Namespaces {
        &mut self.namespaces
    }

    pub fn endpoint(&self, id: EndpointId) -> &EndpointNode {
        &self.endpoints[id.0]
    }

    pub fn request(&self, id: RequestId) -> &RequestNode {
        &self.requests[id.0]
    }

    /// Request ids in execution order.
    pub fn request_ids(&self) -> impl Iterator<Item = RequestId> {
        (0..self.requests.len()).map(RequestId)
    }

    pub fn requests(&self) -> impl Iterator<Item = &RequestNode> {
        self.requests.iter()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Parent path joined with this endpoint's path, unresolved.
    ///
    /// Placeholders are left for the caller to evaluate once, in the scope
    /// of the request's endpoint, so a child can supply or shadow a
    /// variable an ancestor's path uses.
    pub fn endpoint_path(&self, id: EndpointId) -> String {
        let node = self.endpoint(id);
        let base = match node.parent {
            Some(parent) => self.endpoint_path(parent),
            None => String::new(),
        };
        let path = node.spec.path.as_ref().map(render).unwrap_or_default();
        join_urls(&base, &path)
    }

    /// Headers of every ancestor merged down to this endpoint, unresolved.
    pub fn endpoint_headers(&self, id: EndpointId) -> Map<String, Value> {
        self.inherited(id, |spec| &spec.headers)
    }

    /// Query params of every ancestor merged down to this endpoint, unresolved.
    pub fn endpoint_params(&self, id: EndpointId) -> Map<String, Value> {
        self.inherited(id, |spec| &spec.params)
    }

    /// Delay of the nearest endpoint, this one included, that sets one.
    pub fn endpoint_delay(&self, id: EndpointId) -> Option<Duration> {
        let mut next = Some(id);
        while let Some(current) = next {
            let node = self.endpoint(current);
            if let Some(ms) = node.spec.delay {
                return Some(Duration::from_millis(ms));
            }
            next = node.parent;
        }
        None
    }

    fn inherited(
        &self,
        id: EndpointId,
        own: impl Fn(&EndpointSpec) -> &Map<String, Value> + Copy,
    ) -> Map<String, Value> {
        let node = self.endpoint(id);
        let base = match node.parent {
            Some(parent) => self.inherited(parent, own),
            None => Map::new(),
        };
        merge(base, own(&node.spec))
    }

    fn evaluate_map(&self, id: EndpointId, map: &Map<String, Value>) -> Result<Map<String, Value>> {
        let ns = self.endpoint(id).namespace;
        map.iter()
            .map(|(key, value)| Ok((key.clone(), self.namespaces.evaluate(ns, value)?)))
            .collect()
    }

    fn evaluate_str(&self, id: EndpointId, s: &str) -> Result<String> {
        let ns = self.endpoint(id).namespace;
        let value = self.namespaces.evaluate(ns, &Value::String(s.to_string()))?;
        Ok(render(&value))
    }
}

/// Shallow union, `own` winning by key.
fn merge(mut base: Map<String, Value>, own: &Map<String, Value>) -> Map<String, Value> {
    base.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
    base
}

/// Join two URL fragments with exactly one `/` between them.
pub fn join_urls(base: &str, path: &str) -> String {
    if base.is_empty() {
        return path.to_string();
    }
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    fn env() -> Vec<(String, String)> {
        vec![("API_HOST".to_string(), "http://api.local".to_string())]
    }

    fn sample() -> Value {
        json!({
            "path": "${API_HOST}",
            "headers": {"Accept": "application/json", "X-Env": "test"},
            "delay": 5,
            "endpoints": [
                {
                    "name": "users",
                    "path": "/users/",
                    "headers": {"X-Env": "users"},
                    "params": {"page": 1},
                    "vars": {"user_id": 7, "created": "${response.json.id}"},
                    "requests": [
                        {"name": "list", "tests": [{"name": "ok", "assert": "${{ response.ok }}"}]},
                        {"name": "get", "path": "${user_id}", "method": "get", "headers": {"Accept": "text/plain"}},
                    ],
                    "endpoints": [
                        {
                            "name": "admin",
                            "path": "admin",
                            "delay": 0,
                            "requests": [{"name": "grant", "method": "OPTIONS"}],
                        }
                    ],
                },
                {"name": "health", "requests": [{"name": "ping", "path": "/health"}]},
            ],
        })
    }

    fn tree() -> ApiTree {
        ApiTree::build(sample(), env()).unwrap()
    }

    fn by_name<'a>(tree: &'a ApiTree, full_name: &str) -> &'a RequestNode {
        tree.requests()
            .find(|r| r.full_name() == full_name)
            .unwrap()
    }

    #[test_case("/api/", "/users", "/api/users"; "both slashes")]
    #[test_case("/api", "users", "/api/users"; "no slashes")]
    #[test_case("http://h/", "x/", "http://h/x/"; "keeps trailing slash of path")]
    #[test_case("", "/users", "/users"; "empty base")]
    #[test_case("/api", "", "/api"; "empty path")]
    fn joins_urls(base: &str, path: &str, expected: &str) {
        assert_eq!(join_urls(base, path), expected);
    }

    #[test]
    fn requests_are_stored_in_execution_order() {
        let tree = tree();
        let names: Vec<_> = tree.requests().map(RequestNode::full_name).collect();
        assert_eq!(
            names,
            vec!["users::list", "users::get", "users::admin::grant", "health::ping"]
        );
        assert_eq!(
            tree.request(RequestId(0)).tests()[0].full_name(),
            "users::list::ok"
        );
    }

    #[test]
    fn full_url_path_joins_every_level() -> eyre::Result<()> {
        let tree = tree();
        assert_eq!(
            by_name(&tree, "users::get").full_url_path(&tree)?,
            "http://api.local/users/7"
        );
        assert_eq!(
            by_name(&tree, "users::admin::grant").full_url_path(&tree)?,
            "http://api.local/users/admin"
        );
        assert_eq!(
            by_name(&tree, "health::ping").full_url_path(&tree)?,
            "http://api.local/health"
        );
        Ok(())
    }

    #[test]
    fn headers_merge_with_child_winning() -> eyre::Result<()> {
        let tree = tree();
        let headers = by_name(&tree, "users::get").headers(&tree)?;
        assert_eq!(
            Value::Object(headers),
            json!({"Accept": "text/plain", "X-Env": "users"})
        );
        let params = by_name(&tree, "users::admin::grant").params(&tree)?;
        assert_eq!(Value::Object(params), json!({"page": 1}));
        Ok(())
    }

    fn inherited_from_root(root_vars: Value) -> Value {
        json!({
            "path": "http://h/${version}",
            "headers": {"X-User": "${who}"},
            "params": {"lang": "${lang}"},
            "vars": root_vars,
            "endpoints": [{
                "name": "child",
                "vars": {"who": "child", "version": "v2", "lang": "${who}-en"},
                "requests": [{"name": "get", "path": "items"}],
            }],
        })
    }

    #[test_case(json!({}); "defined only by the child")]
    #[test_case(json!({"who": "root", "version": "v1", "lang": "fr"}); "shadowed by the child")]
    fn inherited_values_resolve_in_the_request_scope(root_vars: Value) -> eyre::Result<()> {
        let tree = ApiTree::build(inherited_from_root(root_vars), Vec::new())?;
        let request = by_name(&tree, "child::get");
        assert_eq!(request.full_url_path(&tree)?, "http://h/v2/items");
        assert_eq!(
            Value::Object(request.headers(&tree)?),
            json!({"X-User": "child"})
        );
        assert_eq!(
            Value::Object(request.params(&tree)?),
            json!({"lang": "child-en"})
        );
        Ok(())
    }

    #[test]
    fn inherited_values_stay_raw_until_a_request_resolves_them() {
        let tree = ApiTree::build(inherited_from_root(json!({})), Vec::new()).unwrap();
        let child = by_name(&tree, "child::get").endpoint();
        assert_eq!(tree.endpoint_path(child), "http://h/${version}");
        assert_eq!(
            Value::Object(tree.endpoint_headers(child)),
            json!({"X-User": "${who}"})
        );
        assert_eq!(tree.endpoint_count(), 2);
    }

    #[test]
    fn method_is_checked_on_access() -> eyre::Result<()> {
        let tree = tree();
        assert_eq!(by_name(&tree, "users::list").http_method()?, Method::Get);
        assert_eq!(by_name(&tree, "users::get").http_method()?, Method::Get);
        let err = by_name(&tree, "users::admin::grant")
            .http_method()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "HTTP method not allowed: OPTIONS. Allowed methods: GET, POST, PUT, PATCH, DELETE"
        );
        Ok(())
    }

    #[test]
    fn delay_is_inherited_from_nearest_ancestor() {
        let tree = tree();
        let users = by_name(&tree, "users::get").endpoint();
        let admin = by_name(&tree, "users::admin::grant").endpoint();
        assert_eq!(tree.endpoint_delay(users), Some(Duration::from_millis(5)));
        assert_eq!(tree.endpoint_delay(admin), Some(Duration::ZERO));
    }

    #[test]
    fn endpoint_vars_referencing_response_stay_raw() {
        let tree = tree();
        let ns = tree.endpoint(by_name(&tree, "users::get").endpoint()).namespace();
        assert_eq!(tree.namespaces().lookup(ns, "user_id"), Ok(&json!(7)));
        assert_eq!(
            tree.namespaces().lookup(ns, "created"),
            Ok(&json!("${response.json.id}"))
        );
    }

    #[test]
    fn unknown_request_key_fails_construction() {
        let root = json!({"requests": [{"name": "x", "foo": 1}]});
        match ApiTree::build(root, env()) {
            Err(Error::InvalidKeys { scope, keys }) => {
                assert_eq!(scope, "request");
                assert_eq!(keys, vec!["foo".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn undefined_variable_in_path_is_a_template_error() {
        let tree = ApiTree::build(
            json!({"path": "${NOPE}", "requests": [{"name": "x"}]}),
            Vec::new(),
        )
        .unwrap();
        assert!(matches!(
            tree.request(RequestId(0)).full_url_path(&tree),
            Err(Error::Template(_))
        ));
    }
}
