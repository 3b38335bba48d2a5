//! sonde's request runner
//!
//! Requests run one at a time, in tree order. For each one the runner
//! resolves the method and URL, binds the request's variables raw, resolves
//! headers, params and body, calls the transport, rebinds the variables with
//! the response in scope, runs the tests, and finally masks sensitive fields
//! before anything reaches a reporter.
use eyre::WrapErr;
use serde_json::Map;
use tracing::*;

use crate::{
    assertion::{TestResult, TestStatus},
    http::{Response, Transport},
    masking::Redactor,
    namespace::RESPONSE,
    reporter::Reporter,
    tree::{ApiTree, RequestId},
    Result,
};

/// Outcome of one request execution. Immutable once built.
#[derive(Debug, Clone)]
pub struct ResultBundle {
    response: Response,
    tests_results: Vec<TestResult>,
    no_failure: bool,
}

impl ResultBundle {
    pub fn new(response: Response, tests_results: Vec<TestResult>) -> ResultBundle {
        let no_failure = tests_results.iter().all(TestResult::passed);
        ResultBundle {
            response,
            tests_results,
            no_failure,
        }
    }

    /// The response, already redacted.
    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn tests_results(&self) -> &[TestResult] {
        &self.tests_results
    }

    /// True when every test passed, including when there are none.
    pub fn no_failure(&self) -> bool {
        self.no_failure
    }
}

/// Totals over a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub requests: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    /// Full names of the requests with at least one test not passed.
    pub failed_requests: Vec<String>,
}

impl Summary {
    pub fn record(&mut self, name: &str, bundle: &ResultBundle) {
        self.requests += 1;
        for result in bundle.tests_results() {
            match result.status {
                TestStatus::Passed => self.passed += 1,
                TestStatus::Failed => self.failed += 1,
                TestStatus::Error => self.errors += 1,
            }
        }
        if !bundle.no_failure() {
            self.failed_requests.push(name.to_string());
        }
    }

    pub fn tests(&self) -> usize {
        self.passed + self.failed + self.errors
    }

    pub fn no_failure(&self) -> bool {
        self.failed_requests.is_empty()
    }
}

pub struct Runner {
    transport: Box<dyn Transport>,
    redactor: Redactor,
    span: Span,
    reporters: Vec<Box<dyn Reporter>>,
}

impl Runner {
    pub fn new(transport: impl Transport + 'static) -> Runner {
        Runner {
            transport: Box::new(transport),
            redactor: Redactor::default(),
            span: info_span!("sonde"),
            reporters: Vec::new(),
        }
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Runner {
        self.redactor = redactor;
        self
    }

    /// Span every runner event is emitted under.
    pub fn with_span(mut self, span: Span) -> Runner {
        self.span = span;
        self
    }

    pub fn add_reporter(&mut self, reporter: impl Reporter + 'static) {
        self.reporters.push(Box::new(reporter));
    }

    pub fn add_boxed_reporter(&mut self, reporter: Box<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    /// Run every request of the tree in order.
    ///
    /// Test failures are reported and counted, they never stop the run.
    /// Configuration, template and transport errors do.
    pub async fn run(&mut self, tree: &mut ApiTree) -> eyre::Result<Summary> {
        let mut summary = Summary::default();
        let ids: Vec<RequestId> = tree.request_ids().collect();
        debug!(
            parent: &self.span,
            "running {} request(s) from {} endpoint(s)",
            ids.len(),
            tree.endpoint_count()
        );
        if ids.is_empty() {
            warn!(parent: &self.span, "no requests found");
        }

        for id in ids {
            let name = tree.request(id).full_name().to_string();
            if let Some(delay) = tree.endpoint_delay(tree.request(id).endpoint()) {
                if !delay.is_zero() {
                    debug!(parent: &self.span, "waiting {delay:?} before {name}");
                    tokio::time::sleep(delay).await;
                }
            }

            for reporter in &mut self.reporters {
                reporter.on_start(&name).await?;
            }
            let bundle = self
                .run_request(tree, id)
                .instrument(self.span.clone())
                .await
                .wrap_err_with(|| format!("request \"{name}\" failed"))?;
            summary.record(&name, &bundle);
            for reporter in &mut self.reporters {
                reporter.on_end(&name, &bundle).await?;
            }
        }

        for reporter in &mut self.reporters {
            reporter.on_finish(&summary).await?;
        }
        debug!(parent: &self.span, "runner finished: {summary:?}");

        Ok(summary)
    }

    /// Execute one request and evaluate its tests.
    ///
    /// # Errors
    ///
    /// A disallowed method, an unresolvable placeholder or a transport
    /// failure. Failing tests are not errors.
    pub async fn run_request(&self, tree: &mut ApiTree, id: RequestId) -> Result<ResultBundle> {
        let request = tree.request(id);
        let method = request.http_method()?;
        let url = request.full_url_path(tree)?;
        info!(parent: &self.span, "Making request {method} {url}");

        let ns = tree.endpoint(request.endpoint()).namespace();
        let vars = request.vars().clone();
        tree.namespaces_mut()
            .update(ns, &vars, Map::new(), false)?;

        let descriptor = tree.request(id).descriptor(tree, method, url)?;
        let mut response = self.transport.send(&descriptor).await?;
        debug!(parent: &self.span, "{} returned {}", response.url, response.status());

        let mut extras = Map::new();
        extras.insert(RESPONSE.to_string(), response.to_value());
        tree.namespaces_mut().update(ns, &vars, extras, true)?;

        let scope = tree.namespaces().scope(ns);
        let tests_results: Vec<TestResult> = tree
            .request(id)
            .tests()
            .iter()
            .map(|test| test.run(&scope))
            .collect();
        for result in &tests_results {
            debug!(parent: &self.span, "{} {}", result.name, result.status);
        }

        self.redactor.redact(&mut response);

        Ok(ResultBundle::new(response, tests_results))
    }
}
