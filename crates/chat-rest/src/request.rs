//! Per-request options and body encoding

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::multipart::{Form, Part};
use serde_json::Value;

/// Characters `encodeURIComponent` leaves untouched
const REASON_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub const AUDIT_LOG_REASON: &str = "X-Audit-Log-Reason";

/// A file attached to a multipart request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub name: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

impl FileContent {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Options for one REST call
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Send the `Authorization` header (and honour the global block)
    pub auth: bool,
    /// JSON body; sent as the query string for `GET`
    pub body: Option<Value>,
    pub files: Vec<FileContent>,
    /// Overrides the derived route key
    pub route: Option<String>,
    /// Skip the bucket's spacing floor
    pub short: bool,
    /// Audit log reason
    pub reason: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            auth: true,
            body: None,
            files: Vec::new(),
            route: None,
            short: false,
            reason: None,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unauthenticated() -> Self {
        Self {
            auth: false,
            ..Self::default()
        }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn file(mut self, file: FileContent) -> Self {
        self.files.push(file);
        self
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn short(mut self) -> Self {
        self.short = true;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Percent-encode an audit log reason for use as a header value
pub fn encode_reason(reason: &str) -> String {
    utf8_percent_encode(reason, REASON_ENCODE_SET).to_string()
}

/// Flatten a JSON object into query pairs; arrays repeat the key
pub fn query_pairs(body: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = body else {
        return Vec::new();
    };

    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                pairs.extend(items.iter().map(|item| (key.clone(), query_value(item))));
            }
            other => pairs.push((key.clone(), query_value(other))),
        }
    }
    pairs
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build a multipart form with `payload_json` and `files[n]` parts
pub fn multipart_form(body: Option<&Value>, files: &[FileContent]) -> Result<Form, String> {
    let mut form = Form::new();
    if let Some(body) = body {
        form = form.text("payload_json", body.to_string());
    }

    for (index, file) in files.iter().enumerate() {
        let mut part = Part::bytes(file.data.clone()).file_name(file.name.clone());
        if let Some(content_type) = &file.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| format!("invalid content type {content_type:?}: {e}"))?;
        }
        form = form.part(format!("files[{index}]"), part);
    }

    Ok(form)
}
