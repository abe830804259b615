//! Transport hooks between hyper and the dispatch core.
//!
//! An [`Adapter`] builds the request [`Context`], renders results and errors,
//! and receives lifecycle notifications. Every method has a default, so a
//! custom adapter only overrides what it needs; [`DefaultAdapter`] uses them
//! all.

use async_trait::async_trait;
use bytes::Bytes;
use hserver_core::logging::{error, warn};
use hserver_core::{Context, Error, Result, Stage};
use http::header::{CONTENT_TYPE, HeaderValue};
use http::request::Parts;
use http::{Request, Response, StatusCode, Version};
use http_body_util::Full;
use hyper::body::Incoming;
use serde_json::{Map, Value};

/// Response body produced by adapters.
pub type Body = Full<Bytes>;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf8";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf8";

#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Called before the context is built.
    fn on_request(&self, _request: &Request<Incoming>) {}

    /// Called once the response is built, before it is written to the
    /// connection. `result` is `None` for failed requests.
    fn on_finish(&self, _result: Option<&Value>) {}

    /// Receives `enter`/`leave` failures and failed requests.
    ///
    /// `stage` is `None` for failures outside the pipeline.
    fn on_error(&self, stage: Option<Stage>, err: &Error) {
        match stage {
            Some(stage @ (Stage::Enter | Stage::Leave)) => {
                warn!(stage = %stage, error = %err, "Stage handler failed")
            }
            Some(stage) => error!(stage = %stage, error = %err, "Request failed"),
            None => error!(error = %err, "Request failed"),
        }
    }

    /// Build the request context. The body is not read.
    async fn context(&self, request: Request<Incoming>) -> Result<Context> {
        let (parts, _body) = request.into_parts();
        Ok(context_from_parts(&parts))
    }

    /// Render a successful result as JSON.
    fn response(&self, _context: &Context, result: &Value) -> Result<Response<Body>> {
        let body = serde_json::to_vec(result).map_err(Error::custom)?;
        let mut response = Response::new(Full::new(Bytes::from(body)));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        Ok(response)
    }

    /// Render a failure as text with its status code.
    fn error_response(&self, err: &Error) -> Response<Body> {
        let mut response = Response::new(Full::new(Bytes::from(err.to_string())));
        *response.status_mut() =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE));
        response
    }
}

/// Adapter using every default hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAdapter;

impl Adapter for DefaultAdapter {}

/// Context fields derived from the request head.
///
/// `method`, `httpVersion`, `url`, `header`, `pathname`, `query`, `search`
/// and an empty `body`. `params` comes from the context's typed captures.
pub fn context_from_parts(parts: &Parts) -> Context {
    let uri = &parts.uri;
    let url = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());

    let mut fields = Map::new();
    fields.insert("method".into(), Value::from(parts.method.as_str()));
    fields.insert("httpVersion".into(), Value::from(http_version(parts.version)));
    fields.insert("url".into(), Value::from(url));
    fields.insert("header".into(), Value::Object(headers(parts)));
    fields.insert("pathname".into(), Value::from(uri.path()));
    fields.insert("query".into(), Value::Object(query(uri.query())));
    fields.insert(
        "search".into(),
        uri.query().map_or(Value::Null, |q| Value::from(format!("?{q}"))),
    );
    fields.insert("body".into(), Value::Object(Map::new()));
    Context::from_fields(fields)
}

fn http_version(version: Version) -> String {
    match version {
        Version::HTTP_09 => "0.9".to_string(),
        Version::HTTP_10 => "1.0".to_string(),
        Version::HTTP_11 => "1.1".to_string(),
        Version::HTTP_2 => "2.0".to_string(),
        Version::HTTP_3 => "3.0".to_string(),
        other => format!("{other:?}"),
    }
}

/// Header names are lowercase; repeated headers are joined with `, `.
fn headers(parts: &Parts) -> Map<String, Value> {
    let mut map = Map::new();
    for name in parts.headers.keys() {
        let values: Vec<&str> = parts
            .headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        map.insert(name.as_str().to_string(), Value::from(values.join(", ")));
    }
    map
}

/// Decoded query pairs; a repeated key collects its values into an array.
fn query(raw: Option<&str>) -> Map<String, Value> {
    let pairs: Vec<(String, String)> = raw
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();

    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::from(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::from(value)]);
            }
            None => {
                map.insert(key, Value::from(value));
            }
        }
    }
    map
}
