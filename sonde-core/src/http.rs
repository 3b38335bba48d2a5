//! sonde's transport layer. The engine only talks to a [`Transport`]; the
//! bundled [`Client`] is a thin wrapper over `reqwest::Client` that never
//! follows redirects, so a 3xx reaches the tests as-is.
use http::{HeaderMap, StatusCode};
use indexmap::IndexMap;
use itertools::Itertools;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::*;
use url::Url;

use crate::template::render;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HttpError: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url \"{url}\": {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// HTTP methods a request node may use.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
    ];
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Fully resolved request. Built fresh for every execution.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub params: IndexMap<String, String>,
    pub body: Option<Value>,
}

impl RequestDescriptor {
    /// Build a descriptor from evaluated mappings; values are rendered to text.
    pub fn new(
        method: Method,
        url: impl Into<String>,
        headers: &Map<String, Value>,
        params: &Map<String, Value>,
        body: Option<Value>,
    ) -> RequestDescriptor {
        let text = |map: &Map<String, Value>| {
            map.iter()
                .map(|(k, v)| (k.clone(), render(v)))
                .collect::<IndexMap<_, _>>()
        };
        RequestDescriptor {
            method,
            url: url.into(),
            headers: text(headers),
            params: text(params),
            body,
        }
    }
}

/// Captured result of one transport call.
#[derive(Debug, Clone)]
pub struct Response {
    /// The request that produced this response.
    pub request: RequestDescriptor,
    /// Final URL including the query string.
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub text: String,
    pub elapsed: Duration,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Body parsed as JSON, `None` when it is not JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.text).ok()
    }

    /// Shape the response is bound under in a namespace.
    ///
    /// ```text
    /// status_code  number
    /// ok           bool, true for 2xx
    /// headers      mapping, lower-case names, repeated values joined by ", "
    /// text         raw body
    /// json         parsed body or null
    /// elapsed_ms   number
    /// url          final url
    /// ```
    pub fn to_value(&self) -> Value {
        let headers: Map<String, Value> = self
            .headers
            .keys()
            .map(|name| {
                let joined = self
                    .headers
                    .get_all(name)
                    .iter()
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                    .join(", ");
                (name.as_str().to_string(), Value::String(joined))
            })
            .collect();

        json!({
            "status_code": self.status.as_u16(),
            "ok": self.status.is_success(),
            "headers": headers,
            "text": self.text,
            "json": self.json().unwrap_or_default(),
            "elapsed_ms": u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
            "url": self.url.as_str(),
        })
    }
}

/// Performs one HTTP call. Status codes are data: only failures to obtain a
/// response at all are errors.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<Response, Error>;
}

/// sonde's http client backed by `reqwest`.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: reqwest::Client,
}

impl Client {
    /// Construct a client with redirect following disabled.
    pub fn new() -> Result<Client, Error> {
        let inner = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Client { inner })
    }
}

#[async_trait::async_trait]
impl Transport for Client {
    async fn send(&self, request: &RequestDescriptor) -> Result<Response, Error> {
        let url = Url::parse(&request.url).map_err(|source| Error::InvalidUrl {
            url: request.url.clone(),
            source,
        })?;

        let mut builder = self
            .inner
            .request(request.method.into(), url)
            .query(&request.params.iter().collect::<Vec<_>>());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let req = builder.build()?;
        debug!("Requesting {} {}", req.method(), req.url());

        let started = Instant::now();
        let res = self.inner.execute(req).await?;
        let status = res.status();
        let headers = res.headers().clone();
        let url = res.url().clone();
        let text = res.text().await?;
        let elapsed = started.elapsed();
        debug!("{status} from {url} in {elapsed:?}");

        Ok(Response {
            request: request.clone(),
            url,
            status,
            headers,
            text,
            elapsed,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn descriptor(method: Method, url: String) -> RequestDescriptor {
        let headers = match json!({"X-Trace": "abc", "X-Count": 3}) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let params = match json!({"page": 2}) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        RequestDescriptor::new(method, url, &headers, &params, None)
    }

    #[test_case("get", Method::Get; "lower case")]
    #[test_case("Post", Method::Post; "mixed case")]
    #[test_case("DELETE", Method::Delete; "upper case")]
    fn method_parses_case_insensitively(input: &str, expected: Method) -> eyre::Result<()> {
        assert_eq!(input.parse::<Method>()?, expected);
        Ok(())
    }

    #[test_case("OPTIONS"; "options")]
    #[test_case("HEAD"; "head")]
    #[test_case(""; "empty")]
    fn method_rejects_others(input: &str) {
        assert!(input.parse::<Method>().is_err());
    }

    #[test]
    fn descriptor_renders_values_as_text() {
        let d = descriptor(Method::Get, "http://localhost/".into());
        assert_eq!(d.headers.get("X-Count").map(String::as_str), Some("3"));
        assert_eq!(d.params.get("page").map(String::as_str), Some("2"));
    }

    #[test]
    fn to_value_exposes_json_and_headers() -> eyre::Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse()?);
        headers.append("set-cookie", "a=1".parse()?);
        headers.append("set-cookie", "b=2".parse()?);
        let response = Response {
            request: descriptor(Method::Get, "http://localhost/".into()),
            url: Url::parse("http://localhost/")?,
            status: StatusCode::CREATED,
            headers,
            text: r#"{"id": 7}"#.into(),
            elapsed: Duration::from_millis(12),
        };

        let value = response.to_value();
        assert_eq!(value["status_code"], json!(201));
        assert_eq!(value["ok"], json!(true));
        assert_eq!(value["json"]["id"], json!(7));
        assert_eq!(value["headers"]["set-cookie"], json!("a=1, b=2"));
        assert_eq!(value["elapsed_ms"], json!(12));
        Ok(())
    }

    #[tokio::test]
    async fn client_sends_descriptor_and_does_not_follow_redirects() -> eyre::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/old")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .match_header("x-trace", "abc")
            .with_status(301)
            .with_header("location", "/new")
            .expect(1)
            .create_async()
            .await;
        let never = server
            .mock("GET", "/new")
            .expect(0)
            .create_async()
            .await;

        let client = Client::new()?;
        let res = client
            .send(&descriptor(Method::Get, format!("{}/old", server.url())))
            .await?;
        m.assert_async().await;
        never.assert_async().await;

        assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            res.headers().get("location").map(|v| v.as_bytes()),
            Some(&b"/new"[..])
        );
        Ok(())
    }

    #[tokio::test]
    async fn client_sends_json_body() -> eyre::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/users")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(json!({"name": "ada"})))
            .with_status(201)
            .with_body(r#"{"id": 1}"#)
            .create_async()
            .await;

        let mut request = descriptor(Method::Post, format!("{}/users", server.url()));
        request.body = Some(json!({"name": "ada"}));
        let res = Client::new()?.send(&request).await?;
        m.assert_async().await;

        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.json(), Some(json!({"id": 1})));
        assert_eq!(res.request, request);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_url_is_a_transport_error() -> eyre::Result<()> {
        let res = Client::new()?
            .send(&descriptor(Method::Get, "not a url".into()))
            .await;
        assert!(matches!(res, Err(Error::InvalidUrl { .. })));
        Ok(())
    }
}
