//! Sensitive data masking for captured responses.
//!
//! A [`Redactor`] is built from the field names configured under
//! `[redact] fields` in `sonde.toml`. It runs after the tests of a request,
//! so assertions see real values while reporters only ever see the mask.

use http::header::{HeaderMap, HeaderValue};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

use crate::http::{RequestDescriptor, Response};

/// The mask string used to replace sensitive values.
pub const MASK: &str = "*****";

/// Masks configured field names, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    fields: HashSet<String>,
}

impl Redactor {
    pub fn new<I, S>(fields: I) -> Redactor
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Redactor {
            fields: fields
                .into_iter()
                .map(|field| field.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn is_sensitive(&self, name: &str) -> bool {
        self.fields.contains(&name.to_lowercase())
    }

    /// Mask every configured field of the response and of the request it carries.
    pub fn redact(&self, response: &mut Response) {
        if self.is_empty() {
            return;
        }
        response.headers = self.mask_headers(&response.headers);
        response.url = self.mask_url(&response.url);
        if let Some(text) = self.mask_text(&response.text) {
            response.text = text;
        }
        self.redact_request(&mut response.request);
    }

    fn redact_request(&self, request: &mut RequestDescriptor) {
        self.mask_pairs(&mut request.headers);
        self.mask_pairs(&mut request.params);
        if let Some(body) = request.body.as_mut() {
            self.mask_body(body);
        }
        if let Ok(url) = Url::parse(&request.url) {
            request.url = self.mask_url(&url).to_string();
        }
    }

    fn mask_pairs(&self, pairs: &mut IndexMap<String, String>) {
        for (name, value) in pairs.iter_mut() {
            if self.is_sensitive(name) {
                *value = MASK.to_string();
            }
        }
    }

    /// Masks sensitive query parameters in a URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use url::Url;
    /// use sonde_core::masking::Redactor;
    ///
    /// let redactor = Redactor::new(["access_token"]);
    /// let url = Url::parse("https://api.example.com/users?access_token=secret123&name=john").unwrap();
    /// let masked = redactor.mask_url(&url);
    /// assert!(masked.to_string().contains("access_token=*****"));
    /// assert!(masked.to_string().contains("name=john"));
    /// ```
    pub fn mask_url(&self, url: &Url) -> Url {
        let mut masked_url = url.clone();

        let Some(query) = url.query() else {
            return masked_url;
        };

        // Work with the raw query string to preserve the original encoding.
        let masked_query = query
            .split('&')
            .map(|pair| match pair.split_once('=') {
                Some((key, _value)) if self.is_sensitive(key) => format!("{key}={MASK}"),
                _ => pair.to_string(),
            })
            .collect::<Vec<_>>()
            .join("&");

        masked_url.set_query(Some(&masked_query));
        masked_url
    }

    /// Masks sensitive header values in a HeaderMap.
    ///
    /// # Examples
    ///
    /// ```
    /// use http::header::HeaderMap;
    /// use sonde_core::masking::Redactor;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("authorization", "Bearer secret".parse().unwrap());
    /// headers.insert("content-type", "application/json".parse().unwrap());
    ///
    /// let masked = Redactor::new(["Authorization"]).mask_headers(&headers);
    /// assert_eq!(masked.get("authorization").unwrap(), "*****");
    /// assert_eq!(masked.get("content-type").unwrap(), "application/json");
    /// ```
    pub fn mask_headers(&self, headers: &HeaderMap) -> HeaderMap {
        let mut masked = HeaderMap::with_capacity(headers.len());

        for (name, value) in headers.iter() {
            let masked_value = if self.is_sensitive(name.as_str()) {
                HeaderValue::from_static(MASK)
            } else {
                value.clone()
            };
            masked.append(name.clone(), masked_value);
        }

        masked
    }

    /// Masks matching keys at any depth of a JSON value.
    pub fn mask_body(&self, body: &mut Value) {
        match body {
            Value::Object(map) => {
                for (key, value) in map.iter_mut() {
                    if self.is_sensitive(key) {
                        *value = Value::String(MASK.to_string());
                    } else {
                        self.mask_body(value);
                    }
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|item| self.mask_body(item)),
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
        }
    }

    /// Re-serialized body with fields masked, `None` when the body is not
    /// JSON or nothing matched.
    fn mask_text(&self, text: &str) -> Option<String> {
        let original: Value = serde_json::from_str(text).ok()?;
        let mut masked = original.clone();
        self.mask_body(&mut masked);
        (masked != original).then(|| masked.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};
    use std::time::Duration;

    fn redactor() -> Redactor {
        Redactor::new(["Authorization", "access_token", "password", "x-api-key"])
    }

    #[test]
    fn test_mask_url_with_sensitive_params() {
        let url =
            Url::parse("https://api.example.com/users?access_token=secret123&name=john").unwrap();
        let masked = redactor().mask_url(&url);
        assert!(masked.to_string().contains("access_token=*****"));
        assert!(masked.to_string().contains("name=john"));
    }

    #[test]
    fn test_mask_url_case_insensitive() {
        let url = Url::parse("https://api.example.com/?ACCESS_TOKEN=secret&page=1").unwrap();
        let masked = redactor().mask_url(&url);
        assert!(masked.to_string().contains("ACCESS_TOKEN=*****"));
        assert!(masked.to_string().contains("page=1"));
    }

    #[test]
    fn test_mask_url_without_query_params() {
        let url = Url::parse("https://api.example.com/users").unwrap();
        assert_eq!(redactor().mask_url(&url), url);
    }

    #[test]
    fn test_mask_url_repeated_keys() {
        let url = Url::parse("https://api.example.com/users?access_token=one&access_token=two")
            .unwrap();
        let masked = redactor().mask_url(&url);
        assert!(masked
            .to_string()
            .contains("access_token=*****&access_token=*****"));
    }

    #[test]
    fn test_mask_headers_keeps_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("x-api-key", "one".parse().unwrap());
        headers.append("x-api-key", "two".parse().unwrap());
        headers.append("accept", "text/html".parse().unwrap());

        let masked = redactor().mask_headers(&headers);
        let values: Vec<_> = masked.get_all("x-api-key").iter().collect();
        assert_eq!(values, vec!["*****", "*****"]);
        assert_eq!(masked.get("accept").unwrap(), "text/html");
    }

    #[test]
    fn test_mask_body_at_any_depth() {
        let mut body = json!({
            "user": {"name": "ada", "Password": "hunter2"},
            "tokens": [{"access_token": "abc"}],
        });
        redactor().mask_body(&mut body);
        assert_eq!(
            body,
            json!({
                "user": {"name": "ada", "Password": "*****"},
                "tokens": [{"access_token": "*****"}],
            })
        );
    }

    #[test]
    fn test_redact_response_and_carried_request() {
        let mut request_headers = Map::new();
        request_headers.insert("Authorization".into(), json!("Bearer abc"));
        let request = RequestDescriptor::new(
            Method::Post,
            "https://api.example.com/login?access_token=xyz",
            &request_headers,
            &Map::new(),
            Some(json!({"password": "hunter2", "user": "ada"})),
        );
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "secret123".parse().unwrap());
        let mut response = Response {
            request,
            url: Url::parse("https://api.example.com/login?access_token=xyz").unwrap(),
            status: StatusCode::OK,
            headers,
            text: r#"{"password":"hunter2","ok":true}"#.into(),
            elapsed: Duration::from_millis(1),
        };

        redactor().redact(&mut response);

        assert_eq!(response.headers.get("authorization").unwrap(), MASK);
        assert_eq!(response.json(), Some(json!({"password": MASK, "ok": true})));
        assert!(response.url.as_str().ends_with("access_token=*****"));
        assert_eq!(response.request.headers["Authorization"], MASK);
        assert_eq!(
            response.request.body,
            Some(json!({"password": MASK, "user": "ada"}))
        );
        assert!(response.request.url.ends_with("access_token=*****"));
    }

    #[test]
    fn test_non_json_body_is_left_alone() {
        assert_eq!(redactor().mask_text("password=hunter2"), None);
    }

    #[test]
    fn test_empty_redactor_changes_nothing() {
        let mut body = json!({"password": "x"});
        Redactor::default().mask_body(&mut body);
        assert_eq!(body, json!({"password": "x"}));
    }
}
