use crate::convert::display_string;
use crate::error::Result;
use regex::{Captures, Regex};
use reqwest::Method;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;
use url::{form_urlencoded, Url};

/// Content type used when the caller expresses no preference
pub const DEFAULT_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// A file attached to a multipart form
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FilePart {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        FilePart {
            file_name: file_name.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A form parameter: a plain value or a file
#[derive(Debug, Clone, PartialEq)]
pub enum FormParam {
    Value(Value),
    File(FilePart),
}

impl From<Value> for FormParam {
    fn from(value: Value) -> Self {
        FormParam::Value(value)
    }
}

impl From<FilePart> for FormParam {
    fn from(file: FilePart) -> Self {
        FormParam::File(file)
    }
}

/// Encoded request body
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    /// `application/x-www-form-urlencoded` payload
    Form(String),
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<(String, FilePart)>,
    },
}

/// Everything needed to dispatch one request.
///
/// Built once per call. The auth pre-flight works on a clone and only touches
/// headers and query parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Resolved URL without query string
    pub url: String,
    pub path_params: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    /// Header map, names lowercased
    pub headers: BTreeMap<String, String>,
    pub body: RequestBody,
    pub timeout: Duration,
    pub cache_eligible: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        RequestDescriptor {
            method,
            url: url.into(),
            path_params: BTreeMap::new(),
            query_params: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: RequestBody::Empty,
            timeout: crate::client::DEFAULT_TIMEOUT,
            cache_eligible: false,
        }
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// URL including the query string
    pub fn full_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)?;
        if !self.query_params.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query_params.iter());
        }
        Ok(url)
    }

    /// Cache identity: method, URL and query parameters in sorted order
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.url.as_bytes());
        for (k, v) in &self.query_params {
            hasher.update([0]);
            hasher.update(k.as_bytes());
            hasher.update([b'=']);
            hasher.update(v.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Substitute `{name}` placeholders in `path` with percent-encoded path
/// parameters. Placeholders without a parameter are left as they are.
pub fn build_url(base_url: &str, path: &str, path_params: &BTreeMap<String, Value>) -> String {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();

    let url = format!("{}{}", base_url, path);
    let Some(re) = PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([\w-]+)\}").ok())
        .as_ref()
    else {
        return url;
    };

    re.replace_all(&url, |caps: &Captures| match path_params.get(&caps[1]) {
        Some(value) => urlencoding::encode(&param_to_string(value)).into_owned(),
        None => caps[0].to_string(),
    })
    .into_owned()
}

/// String form of a parameter value.
/// Arrays are comma-joined and objects become JSON text.
pub fn param_to_string(value: &Value) -> String {
    display_string(value)
}

/// Drop null entries and stringify the rest
pub fn normalize_params(params: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), param_to_string(v)))
        .collect()
}

/// Whether a mime type is JSON
pub fn is_json_mime(mime: &str) -> bool {
    static JSON_MIME: OnceLock<Option<Regex>> = OnceLock::new();
    JSON_MIME
        .get_or_init(|| Regex::new(r"(?i)^application/json(;.*)?$").ok())
        .as_ref()
        .map(|re| re.is_match(mime.trim()))
        .unwrap_or(false)
}

/// Pick a content type: the first JSON type if any, else the first listed
pub fn json_preferred_mime(mimes: &[String]) -> Option<&str> {
    mimes
        .iter()
        .find(|m| is_json_mime(m))
        .or_else(|| mimes.first())
        .map(String::as_str)
}

/// Encode the body for the negotiated content type.
///
/// A bare JSON array is sent as `{"content": [...]}`, the server expects list
/// payloads under that key.
pub fn encode_body(
    content_type: Option<&str>,
    form_params: &BTreeMap<String, FormParam>,
    body: Option<&Value>,
) -> RequestBody {
    match content_type {
        Some(FORM_URLENCODED) => {
            let plain: BTreeMap<String, Value> = form_params
                .iter()
                .filter_map(|(k, p)| match p {
                    FormParam::Value(v) => Some((k.clone(), v.clone())),
                    FormParam::File(_) => None,
                })
                .collect();
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(normalize_params(&plain))
                .finish();
            RequestBody::Form(encoded)
        }
        Some(MULTIPART_FORM_DATA) => {
            let mut fields = Vec::new();
            let mut files = Vec::new();
            for (key, param) in form_params {
                match param {
                    FormParam::Value(Value::Null) => {}
                    FormParam::Value(v) => fields.push((key.clone(), param_to_string(v))),
                    FormParam::File(file) => files.push((key.clone(), file.clone())),
                }
            }
            RequestBody::Multipart { fields, files }
        }
        _ => match body {
            None | Some(Value::Null) => RequestBody::Empty,
            Some(Value::Array(items)) => RequestBody::Json(json!({ "content": items })),
            Some(other) => RequestBody::Json(other.clone()),
        },
    }
}
