//! Layered variable namespaces.
//!
//! Every endpoint of the API tree owns one layer. Layers live in a
//! [`Namespaces`] arena and point at zero or one parent; lookups walk from a
//! layer up through its ancestors, so a child binding shadows a parent
//! binding of the same name. The environment layer sits at the very top.
//!
//! ```text
//! +-------------+     +-------------+     +-------------+
//! | environment | <-- | root        | <-- | endpoint    |  <- lookup starts here
//! | (env vars)  |     | vars        |     | vars        |
//! +-------------+     +-------------+     +-------------+
//! ```
use serde_json::{Map, Value};
use tracing::*;

use crate::template::{self, TemplateError};

/// Name the captured response is bound under after a call completes.
pub const RESPONSE: &str = "response";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("undefined variable \"{0}\"")]
pub struct UndefinedVariable(pub String);

/// Read access to variables by name.
pub trait Lookup {
    fn lookup(&self, name: &str) -> Result<&Value, UndefinedVariable>;
}

impl Lookup for Map<String, Value> {
    fn lookup(&self, name: &str) -> Result<&Value, UndefinedVariable> {
        self.get(name)
            .ok_or_else(|| UndefinedVariable(name.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceId(usize);

#[derive(Debug, Default)]
struct Layer {
    bindings: Map<String, Value>,
    parent: Option<NamespaceId>,
}

/// Arena of namespace layers. Ids are only minted by [`Namespaces::create`],
/// so indexing with an id from the same arena never fails.
#[derive(Debug, Default)]
pub struct Namespaces {
    layers: Vec<Layer>,
}

impl Namespaces {
    pub fn new() -> Namespaces {
        Namespaces::default()
    }

    /// Create an empty layer below `parent`.
    pub fn create(&mut self, parent: Option<NamespaceId>) -> NamespaceId {
        self.layers.push(Layer {
            bindings: Map::new(),
            parent,
        });
        NamespaceId(self.layers.len() - 1)
    }

    /// Create a root layer holding the given environment variables verbatim.
    pub fn environment(&mut self, vars: impl IntoIterator<Item = (String, String)>) -> NamespaceId {
        let id = self.create(None);
        self.layers[id.0]
            .bindings
            .extend(vars.into_iter().map(|(k, v)| (k, Value::String(v))));
        id
    }

    pub fn parent(&self, id: NamespaceId) -> Option<NamespaceId> {
        self.layers[id.0].parent
    }

    /// Bindings of this layer only, without ancestors.
    pub fn local(&self, id: NamespaceId) -> &Map<String, Value> {
        &self.layers[id.0].bindings
    }

    pub fn lookup(&self, id: NamespaceId, name: &str) -> Result<&Value, UndefinedVariable> {
        let mut next = Some(id);
        while let Some(current) = next {
            let layer = &self.layers[current.0];
            if let Some(value) = layer.bindings.get(name) {
                return Ok(value);
            }
            next = layer.parent;
        }
        Err(UndefinedVariable(name.to_string()))
    }

    /// A lookup view starting at `id`.
    pub fn scope(&self, id: NamespaceId) -> Scope<'_> {
        Scope {
            namespaces: self,
            id,
        }
    }

    /// Resolve placeholders in `value` against the layer `id`.
    pub fn evaluate(&self, id: NamespaceId, value: &Value) -> Result<Value, TemplateError> {
        template::evaluate(value, &self.scope(id))
    }

    /// Merge `bindings` into the layer `id`.
    ///
    /// `extras` are bound first and verbatim. With `preevaluate` every binding
    /// is resolved against that state before anything is merged; otherwise the
    /// raw values are stored and resolved later. `extras` are bound once more
    /// after the merge so reserved names always hold what the caller injected.
    /// Ancestor layers are never touched.
    ///
    /// # Errors
    ///
    /// Fails with the first [`TemplateError`] hit while preevaluating. The
    /// layer then holds the extras but none of the bindings.
    pub fn update(
        &mut self,
        id: NamespaceId,
        bindings: &Map<String, Value>,
        extras: Map<String, Value>,
        preevaluate: bool,
    ) -> Result<(), TemplateError> {
        self.layers[id.0]
            .bindings
            .extend(extras.iter().map(|(k, v)| (k.clone(), v.clone())));

        let values = if preevaluate {
            let scope = self.scope(id);
            bindings
                .iter()
                .map(|(name, value)| Ok((name.clone(), template::evaluate(value, &scope)?)))
                .collect::<Result<Vec<_>, TemplateError>>()?
        } else {
            bindings
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        };
        trace!(
            "binding {} variable(s) (preevaluate={preevaluate}, extras={})",
            values.len(),
            extras.len()
        );

        let layer = &mut self.layers[id.0];
        layer.bindings.extend(values);
        layer.bindings.extend(extras);
        Ok(())
    }
}

/// Lookup view over a layer and its ancestors.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    namespaces: &'a Namespaces,
    id: NamespaceId,
}

impl Lookup for Scope<'_> {
    fn lookup(&self, name: &str) -> Result<&Value, UndefinedVariable> {
        self.namespaces.lookup(self.id, name)
    }
}
