use console::{style, Term};
use eyre::WrapErr;
use http::HeaderMap;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::{
    assertion::TestStatus,
    runner::{ResultBundle, Summary},
};

/// Reporter trait. The trait is based on the "template method" pattern.
/// Implement the on_xxx methods you need to hook into the runner; the
/// others do nothing.
#[async_trait::async_trait]
pub trait Reporter: Send {
    /// Called before a request is sent.
    async fn on_start(&mut self, _name: &str) -> eyre::Result<()> {
        Ok(())
    }

    /// Called when a request and its tests are done. The response in the
    /// bundle is already redacted.
    async fn on_end(&mut self, _name: &str, _bundle: &ResultBundle) -> eyre::Result<()> {
        Ok(())
    }

    /// Called once after the last request.
    async fn on_finish(&mut self, _summary: &Summary) -> eyre::Result<()> {
        Ok(())
    }
}

/// Built-in reporters, selectable by name from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ReporterType {
    List,
    Null,
}

impl ReporterType {
    pub fn build(self, capture_http: bool) -> Box<dyn Reporter> {
        match self {
            ReporterType::List => Box::new(ListReporter::new(capture_http)),
            ReporterType::Null => Box::new(NullReporter),
        }
    }
}

pub struct NullReporter;

#[async_trait::async_trait]
impl Reporter for NullReporter {}

/// Prints one line per test, optionally preceded by the HTTP exchange.
pub struct ListReporter {
    terminal: Term,
    capture_http: bool,
}

impl ListReporter {
    pub fn new(capture_http: bool) -> ListReporter {
        ListReporter {
            terminal: Term::stdout(),
            capture_http,
        }
    }

    fn print_http(&self, bundle: &ResultBundle) -> eyre::Result<()> {
        let response = bundle.response();
        let request = &response.request;

        write(&self.terminal, format!(" => {} {}", request.method, response.url))?;
        write(&self.terminal, "  > request:")?;
        write(&self.terminal, "    > headers:")?;
        write_pairs(&self.terminal, "       >", &request.headers)?;
        if let Some(body) = &request.body {
            write(&self.terminal, format!("    > body: {body}"))?;
        }
        write(
            &self.terminal,
            format!(
                "  < response {} ({} ms)",
                response.status(),
                response.elapsed.as_millis()
            ),
        )?;
        write(&self.terminal, "    < headers:")?;
        write_pairs(&self.terminal, "       <", &header_pairs(response.headers()))?;
        write(&self.terminal, format!("    < body: {}", response.text))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Reporter for ListReporter {
    async fn on_end(&mut self, name: &str, bundle: &ResultBundle) -> eyre::Result<()> {
        if self.capture_http {
            self.print_http(bundle)?;
        }

        if bundle.tests_results().is_empty() {
            let status = style("-").dim();
            self.terminal.write_line(&format!(
                "{status} {name} [{}]",
                bundle.response().status()
            ))?;
        }

        for result in bundle.tests_results() {
            match result.status {
                TestStatus::Passed => {
                    let status = style("✓").green();
                    self.terminal
                        .write_line(&format!("{status} {}", result.name))?;
                }
                TestStatus::Failed | TestStatus::Error => {
                    let status = style("✘").red();
                    self.terminal.write_line(&format!(
                        "{status} {} {}: {}",
                        result.name,
                        result.status,
                        result.failure.as_deref().unwrap_or_default()
                    ))?;
                }
            }
        }

        Ok(())
    }

    async fn on_finish(&mut self, summary: &Summary) -> eyre::Result<()> {
        let line = format!(
            "{} request(s), {} test(s): {} passed, {} failed, {} error(s)",
            summary.requests,
            summary.tests(),
            summary.passed,
            summary.failed,
            summary.errors
        );
        let line = if summary.no_failure() {
            style(line).green()
        } else {
            style(line).red()
        };
        self.terminal.write_line(&format!("{line}"))?;
        Ok(())
    }
}

fn header_pairs(headers: &HeaderMap) -> IndexMap<String, String> {
    headers
        .keys()
        .map(|name| {
            let value = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()))
                .join(", ");
            (name.to_string(), value)
        })
        .collect()
}

fn write_pairs(term: &Term, prefix: &str, pairs: &IndexMap<String, String>) -> eyre::Result<()> {
    for (key, value) in pairs {
        write(term, format!("{prefix} {key}: {value}"))?;
    }
    Ok(())
}

fn write(term: &Term, s: impl AsRef<str>) -> eyre::Result<()> {
    let colored = style(s.as_ref()).dim();
    term.write_line(&format!("{colored}"))
        .wrap_err("failed to write character on terminal")
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn header_pairs_join_repeated_values() -> eyre::Result<()> {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", "a=1".parse()?);
        headers.append("set-cookie", "b=2".parse()?);
        headers.append("content-type", "text/plain".parse()?);

        let pairs = header_pairs(&headers);
        assert_eq!(pairs["set-cookie"], "a=1, b=2");
        assert_eq!(pairs["content-type"], "text/plain");
        Ok(())
    }

    #[test]
    fn reporter_type_from_name() -> eyre::Result<()> {
        assert_eq!("list".parse::<ReporterType>()?, ReporterType::List);
        assert_eq!(ReporterType::Null.to_string(), "null");
        assert!("table".parse::<ReporterType>().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn null_reporter_accepts_every_hook() -> eyre::Result<()> {
        let mut reporter = NullReporter;
        reporter.on_start("users::list").await?;
        reporter.on_finish(&Summary::default()).await?;
        Ok(())
    }
}
