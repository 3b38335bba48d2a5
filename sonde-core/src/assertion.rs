//! Test nodes and their outcomes.
//!
//! A test is a named assertion expression evaluated after its request's
//! response has been bound. The outcome is one of three statuses:
//!
//! - `PASSED` when the expression yields `true`;
//! - `FAILED` when it yields `false`, with the expression text as detail;
//! - `ERROR` when it cannot be evaluated or yields a non-boolean, with the
//!   error message as detail.
//!
//! An `ERROR` never stops sibling tests.
use serde_json::Value;

use crate::{expr, namespace::Lookup, spec::TestSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    /// Full name of the test, `endpoint::request::test`.
    pub name: String,
    pub assertion: String,
    pub status: TestStatus,
    /// Present only when the status is not `PASSED`.
    pub failure: Option<String>,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

#[derive(Debug, Clone)]
pub struct TestNode {
    spec: TestSpec,
    full_name: String,
}

impl TestNode {
    pub fn new(spec: TestSpec, request_full_name: &str) -> TestNode {
        let full_name = format!("{request_full_name}::{}", spec.name);
        TestNode { spec, full_name }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn assertion(&self) -> &str {
        &self.spec.assertion
    }

    /// Evaluate the assertion. Never fails: evaluation problems become an
    /// `ERROR` result.
    pub fn run<L: Lookup + ?Sized>(&self, scope: &L) -> TestResult {
        let (status, failure) = match expr::evaluate(expression(&self.spec.assertion), scope) {
            Ok(Value::Bool(true)) => (TestStatus::Passed, None),
            Ok(Value::Bool(false)) => (TestStatus::Failed, Some(self.spec.assertion.clone())),
            Ok(other) => (
                TestStatus::Error,
                Some(format!("assertion must evaluate to a boolean, got {other}")),
            ),
            Err(e) => (TestStatus::Error, Some(e.to_string())),
        };
        TestResult {
            name: self.full_name.clone(),
            assertion: self.spec.assertion.clone(),
            status,
            failure,
        }
    }
}

/// The expression inside an optional `${{ }}` wrapper.
fn expression(assertion: &str) -> &str {
    let trimmed = assertion.trim();
    trimmed
        .strip_prefix("${{")
        .and_then(|inner| inner.strip_suffix("}}"))
        .unwrap_or(trimmed)
}
