//! CBOR snapshots carried as frame payloads.
//!
//! Both snapshots are CBOR maps keyed by small integers rather than field
//! names, so renaming a Rust field never changes the wire format. Unknown keys
//! are skipped when decoding.

use std::collections::BTreeMap;

use ciborium::Value;
use http::header::{CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::request::Parts;
use http::{Extensions, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri, Version};

use crate::error::{Result, TunnelError};

mod key {
    pub const METHOD: u64 = 1;
    pub const URL: u64 = 2;
    pub const PROTO: u64 = 3;
    pub const HEADERS: u64 = 4;
    pub const CONTENT_LENGTH: u64 = 5;
    pub const TRANSFER_ENCODING: u64 = 6;
    pub const CLOSE: u64 = 7;
    pub const HOST: u64 = 8;
    pub const FORM: u64 = 9;
    pub const TRAILER: u64 = 10;
    pub const REMOTE_ADDR: u64 = 11;
    pub const REQUEST_URI: u64 = 12;

    pub const RESPONSE_HEADERS: u64 = 1;
    pub const RESPONSE_STATUS: u64 = 2;
}

const REQUEST: &str = "request";
const RESPONSE_HEADERS: &str = "response headers";

/// Request metadata that has no home in [`http::Request`].
///
/// The backend attaches one to every reconstructed request's extensions. A
/// frontend may attach one to an outgoing request to supply the fields that
/// cannot be derived from the request itself (remote address, form values,
/// declared trailers).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Declared body length; `None` when unknown.
    pub content_length: Option<u64>,
    pub transfer_encoding: Vec<String>,
    /// The client asked for the connection to be closed after this exchange.
    pub close: bool,
    pub host: String,
    pub form: BTreeMap<String, Vec<String>>,
    /// Trailer names announced by the client.
    pub trailer: HeaderMap,
    pub remote_addr: String,
    /// The unmodified request-target sent by the client.
    pub request_uri: String,
}

/// Everything about a request except its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub proto: String,
    pub headers: HeaderMap,
    pub info: RequestInfo,
}

impl RequestSnapshot {
    /// Snapshot a live request.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self::capture(
            request.method(),
            request.uri(),
            request.version(),
            request.headers(),
            request.extensions(),
        )
    }

    /// Snapshot the head of a request that has been split from its body.
    pub fn from_parts(parts: &Parts) -> Self {
        Self::capture(
            &parts.method,
            &parts.uri,
            parts.version,
            &parts.headers,
            &parts.extensions,
        )
    }

    fn capture(
        method: &Method,
        uri: &Uri,
        version: Version,
        headers: &HeaderMap,
        extensions: &Extensions,
    ) -> Self {
        let mut info = extensions.get::<RequestInfo>().cloned().unwrap_or_default();

        if info.content_length.is_none() {
            info.content_length = headers
                .get(CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok());
        }
        if info.transfer_encoding.is_empty() {
            info.transfer_encoding = header_tokens(headers, &TRANSFER_ENCODING);
        }
        if !info.close {
            info.close = header_tokens(headers, &CONNECTION)
                .iter()
                .any(|token| token.eq_ignore_ascii_case("close"));
        }
        if info.host.is_empty() {
            info.host = uri
                .authority()
                .map(|authority| authority.to_string())
                .or_else(|| {
                    headers
                        .get(HOST)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string)
                })
                .unwrap_or_default();
        }
        if info.request_uri.is_empty() {
            info.request_uri = uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string());
        }

        Self {
            method: method.as_str().to_string(),
            url: uri.to_string(),
            proto: format!("{version:?}"),
            headers: headers.clone(),
            info,
        }
    }

    /// Rebuild a request around `body`.
    ///
    /// The snapshot's [`RequestInfo`] is stored in the request's extensions.
    pub fn into_request<B>(self, body: B) -> Result<Request<B>> {
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|err| decode_error(REQUEST, format!("method {:?}: {err}", self.method)))?;
        let version = parse_version(&self.proto)?;

        let mut request = Request::builder()
            .method(method)
            .uri(self.url.as_str())
            .version(version)
            .body(body)?;
        *request.headers_mut() = self.headers;
        request.extensions_mut().insert(self.info);
        Ok(request)
    }

    /// CBOR-encode the snapshot.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let content_length = self
            .info
            .content_length
            .and_then(|len| i64::try_from(len).ok())
            .unwrap_or(-1);

        let entries = vec![
            field(key::METHOD, Value::Text(self.method.clone())),
            field(key::URL, Value::Text(self.url.clone())),
            field(key::PROTO, Value::Text(self.proto.clone())),
            field(key::HEADERS, headers_value(&self.headers)),
            field(key::CONTENT_LENGTH, Value::Integer(content_length.into())),
            field(
                key::TRANSFER_ENCODING,
                Value::Array(
                    self.info
                        .transfer_encoding
                        .iter()
                        .cloned()
                        .map(Value::Text)
                        .collect(),
                ),
            ),
            field(key::CLOSE, Value::Bool(self.info.close)),
            field(key::HOST, Value::Text(self.info.host.clone())),
            field(key::FORM, form_value(&self.info.form)),
            field(key::TRAILER, headers_value(&self.info.trailer)),
            field(key::REMOTE_ADDR, Value::Text(self.info.remote_addr.clone())),
            field(key::REQUEST_URI, Value::Text(self.info.request_uri.clone())),
        ];
        encode_map(REQUEST, entries)
    }

    /// Decode a snapshot produced by [`RequestSnapshot::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut map = MapReader::decode(REQUEST, bytes)?;

        let method = map.text(key::METHOD)?;
        if method.is_empty() {
            return Err(decode_error(REQUEST, "missing method"));
        }
        let url = map.text(key::URL)?;
        if url.is_empty() {
            return Err(decode_error(REQUEST, "missing url"));
        }

        let content_length = match map.take(key::CONTENT_LENGTH) {
            None => None,
            Some(value) => {
                let len = integer(REQUEST, key::CONTENT_LENGTH, value)?;
                u64::try_from(len).ok()
            }
        };

        Ok(Self {
            method,
            url,
            proto: map.text(key::PROTO)?,
            headers: map.headers(key::HEADERS)?,
            info: RequestInfo {
                content_length,
                transfer_encoding: map.text_array(key::TRANSFER_ENCODING)?,
                close: map.bool(key::CLOSE)?,
                host: map.text(key::HOST)?,
                form: map.form(key::FORM)?,
                trailer: map.headers(key::TRAILER)?,
                remote_addr: map.text(key::REMOTE_ADDR)?,
                request_uri: map.text(key::REQUEST_URI)?,
            },
        })
    }
}

/// Response headers and status, sent once before the first body byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaderSnapshot {
    pub headers: HeaderMap,
    /// `None` encodes as status 0 ("not set").
    pub status: Option<StatusCode>,
}

impl ResponseHeaderSnapshot {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let status = self.status.map(|status| status.as_u16()).unwrap_or(0);
        encode_map(
            RESPONSE_HEADERS,
            vec![
                field(key::RESPONSE_HEADERS, headers_value(&self.headers)),
                field(key::RESPONSE_STATUS, Value::Integer(status.into())),
            ],
        )
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut map = MapReader::decode(RESPONSE_HEADERS, bytes)?;
        let headers = map.headers(key::RESPONSE_HEADERS)?;
        let status = match map.take(key::RESPONSE_STATUS) {
            None => None,
            Some(value) => match integer(RESPONSE_HEADERS, key::RESPONSE_STATUS, value)? {
                0 => None,
                code => {
                    let code = u16::try_from(code)
                        .ok()
                        .and_then(|code| StatusCode::from_u16(code).ok())
                        .ok_or_else(|| {
                            decode_error(RESPONSE_HEADERS, format!("invalid status {code}"))
                        })?;
                    Some(code)
                }
            },
        };
        Ok(Self { headers, status })
    }
}

fn parse_version(proto: &str) -> Result<Version> {
    match proto {
        "" | "HTTP/1.1" => Ok(Version::HTTP_11),
        "HTTP/1.0" => Ok(Version::HTTP_10),
        "HTTP/0.9" => Ok(Version::HTTP_09),
        "HTTP/2.0" | "HTTP/2" => Ok(Version::HTTP_2),
        "HTTP/3.0" | "HTTP/3" => Ok(Version::HTTP_3),
        other => Err(decode_error(REQUEST, format!("unsupported protocol {other:?}"))),
    }
}

fn header_tokens(headers: &HeaderMap, name: &HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn field(key: u64, value: Value) -> (Value, Value) {
    (Value::Integer(key.into()), value)
}

fn headers_value(headers: &HeaderMap) -> Value {
    let entries = headers
        .keys()
        .map(|name| {
            let values = headers
                .get_all(name)
                .iter()
                .map(|value| Value::Bytes(value.as_bytes().to_vec()))
                .collect();
            (Value::Text(name.as_str().to_string()), Value::Array(values))
        })
        .collect();
    Value::Map(entries)
}

fn form_value(form: &BTreeMap<String, Vec<String>>) -> Value {
    let entries = form
        .iter()
        .map(|(name, values)| {
            let values = values.iter().cloned().map(Value::Text).collect();
            (Value::Text(name.clone()), Value::Array(values))
        })
        .collect();
    Value::Map(entries)
}

fn encode_map(what: &'static str, entries: Vec<(Value, Value)>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(&Value::Map(entries), &mut out).map_err(|err| {
        TunnelError::Encode {
            what,
            message: err.to_string(),
        }
    })?;
    Ok(out)
}

fn decode_error(what: &'static str, message: impl Into<String>) -> TunnelError {
    TunnelError::Decode {
        what,
        message: message.into(),
    }
}

fn integer(what: &'static str, key: u64, value: Value) -> Result<i128> {
    value
        .as_integer()
        .map(i128::from)
        .ok_or_else(|| decode_error(what, format!("field {key}: expected integer")))
}

/// Field access over a decoded integer-keyed map.
struct MapReader {
    what: &'static str,
    entries: Vec<(Value, Value)>,
}

impl MapReader {
    fn decode(what: &'static str, bytes: &[u8]) -> Result<Self> {
        let value: Value = ciborium::de::from_reader(bytes)
            .map_err(|err| decode_error(what, err.to_string()))?;
        let entries = value
            .into_map()
            .map_err(|_| decode_error(what, "expected a map"))?;
        Ok(Self { what, entries })
    }

    fn take(&mut self, key: u64) -> Option<Value> {
        let position = self.entries.iter().position(|(k, _)| {
            k.as_integer()
                .and_then(|k| u64::try_from(k).ok())
                .is_some_and(|k| k == key)
        })?;
        Some(self.entries.swap_remove(position).1)
    }

    fn mismatch(&self, key: u64, expected: &str) -> TunnelError {
        decode_error(self.what, format!("field {key}: expected {expected}"))
    }

    fn text(&mut self, key: u64) -> Result<String> {
        match self.take(key) {
            None => Ok(String::new()),
            Some(value) => value.into_text().map_err(|_| self.mismatch(key, "text")),
        }
    }

    fn bool(&mut self, key: u64) -> Result<bool> {
        match self.take(key) {
            None => Ok(false),
            Some(value) => value.as_bool().ok_or_else(|| self.mismatch(key, "bool")),
        }
    }

    fn text_array(&mut self, key: u64) -> Result<Vec<String>> {
        let Some(value) = self.take(key) else {
            return Ok(Vec::new());
        };
        let items = value.into_array().map_err(|_| self.mismatch(key, "array"))?;
        items
            .into_iter()
            .map(|item| item.into_text().map_err(|_| self.mismatch(key, "text items")))
            .collect()
    }

    fn string_lists(&mut self, key: u64) -> Result<Vec<(String, Vec<Value>)>> {
        let Some(value) = self.take(key) else {
            return Ok(Vec::new());
        };
        let entries = value.into_map().map_err(|_| self.mismatch(key, "map"))?;
        entries
            .into_iter()
            .map(|(name, values)| {
                let name = name.into_text().map_err(|_| self.mismatch(key, "text keys"))?;
                let values = values
                    .into_array()
                    .map_err(|_| self.mismatch(key, "array values"))?;
                Ok((name, values))
            })
            .collect()
    }

    fn headers(&mut self, key: u64) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, values) in self.string_lists(key)? {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| decode_error(self.what, format!("header {name:?}: {err}")))?;
            for value in values {
                let bytes = match value {
                    Value::Bytes(bytes) => bytes,
                    Value::Text(text) => text.into_bytes(),
                    _ => return Err(self.mismatch(key, "header values")),
                };
                let value = HeaderValue::from_bytes(&bytes)
                    .map_err(|err| decode_error(self.what, format!("header {name}: {err}")))?;
                headers.append(name.clone(), value);
            }
        }
        Ok(headers)
    }

    fn form(&mut self, key: u64) -> Result<BTreeMap<String, Vec<String>>> {
        self.string_lists(key)?
            .into_iter()
            .map(|(name, values)| {
                let values = values
                    .into_iter()
                    .map(|value| value.into_text().map_err(|_| self.mismatch(key, "text values")))
                    .collect::<Result<Vec<_>>>()?;
                Ok((name, values))
            })
            .collect()
    }
}
