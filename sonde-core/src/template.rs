//! Placeholder resolution for configuration values.
//!
//! Two placeholder forms are recognised inside strings:
//!
//! - `${path}` reads a variable, optionally walking into it with `.field`,
//!   `[0]` or `["key"]` accessors (`${response.json.items[0].id}`);
//! - `${{ expression }}` evaluates an [`expr`](crate::expr) expression.
//!
//! A string made of exactly one placeholder yields the typed value, anything
//! else is spliced into the surrounding text. Mappings and sequences are
//! resolved element by element, keeping their shape and key order.
use serde_json::{Map, Value};

use crate::{
    expr::{self, EvalError},
    namespace::{Lookup, UndefinedVariable},
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to resolve \"{template}\": {source}")]
    Undefined {
        template: String,
        #[source]
        source: UndefinedVariable,
    },
    #[error("failed to evaluate \"{template}\": {source}")]
    Evaluation {
        template: String,
        #[source]
        source: EvalError,
    },
    #[error("invalid placeholder in \"{template}\": {reason}")]
    Syntax { template: String, reason: String },
}

impl TemplateError {
    fn from_eval(template: &str, error: EvalError) -> TemplateError {
        match error {
            EvalError::Undefined(source) => TemplateError::Undefined {
                template: template.to_string(),
                source,
            },
            EvalError::Syntax { reason, .. } => TemplateError::Syntax {
                template: template.to_string(),
                reason,
            },
            source => TemplateError::Evaluation {
                template: template.to_string(),
                source,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Variable(&'a str),
    Expression(&'a str),
}

impl Segment<'_> {
    fn resolve<L: Lookup + ?Sized>(&self, template: &str, scope: &L) -> Result<Value, TemplateError> {
        let result = match self {
            Segment::Text(text) => return Ok(Value::String(text.to_string())),
            Segment::Variable(path) => expr::parse_path(path).and_then(|path| path.eval(scope)),
            Segment::Expression(src) => expr::evaluate(src, scope),
        };
        result.map_err(|e| TemplateError::from_eval(template, e))
    }
}

fn segments(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        if start > 0 {
            segments.push(Segment::Text(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let (segment, consumed) = if let Some(body) = after.strip_prefix('{') {
            let end = body.find("}}").ok_or_else(|| TemplateError::Syntax {
                template: template.to_string(),
                reason: "missing closing \"}}\"".into(),
            })?;
            (Segment::Expression(&body[..end]), end + 3)
        } else {
            let end = after.find('}').ok_or_else(|| TemplateError::Syntax {
                template: template.to_string(),
                reason: "missing closing \"}\"".into(),
            })?;
            (Segment::Variable(&after[..end]), end + 1)
        };
        segments.push(segment);
        rest = &after[consumed..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }

    Ok(segments)
}

/// Render a value the way it is spliced into text: strings verbatim,
/// everything else as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether `s` contains any placeholder syntax.
pub fn has_placeholder(s: &str) -> bool {
    s.contains("${")
}

/// Whether any placeholder inside `value` reads the variable `name`.
///
/// Placeholders that fail to parse are reported as not referencing it, so
/// the parse error surfaces when the value is evaluated.
pub fn references(value: &Value, name: &str) -> bool {
    match value {
        Value::String(s) => segments(s).is_ok_and(|segments| {
            segments.iter().any(|segment| match segment {
                Segment::Text(_) => false,
                Segment::Variable(src) | Segment::Expression(src) => {
                    expr::parse(src).is_ok_and(|e| e.references(name))
                }
            })
        }),
        Value::Array(items) => items.iter().any(|item| references(item, name)),
        Value::Object(map) => map.values().any(|item| references(item, name)),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Resolve every placeholder in `value`.
///
/// # Errors
///
/// Fails on the first placeholder that references an undefined variable,
/// fails to evaluate or is malformed.
pub fn evaluate<L: Lookup + ?Sized>(value: &Value, scope: &L) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => evaluate_str(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| Ok((key.clone(), evaluate(item, scope)?)))
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object),
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(value.clone()),
    }
}

fn evaluate_str<L: Lookup + ?Sized>(template: &str, scope: &L) -> Result<Value, TemplateError> {
    if !has_placeholder(template) {
        return Ok(Value::String(template.to_string()));
    }

    match segments(template)?.as_slice() {
        [single @ (Segment::Variable(_) | Segment::Expression(_))] => {
            single.resolve(template, scope)
        }
        segments => {
            let mut out = String::with_capacity(template.len());
            for segment in segments {
                match segment {
                    Segment::Text(text) => out.push_str(text),
                    placeholder => out.push_str(&render(&placeholder.resolve(template, scope)?)),
                }
            }
            Ok(Value::String(out))
        }
    }
}
