use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde_json::{Map, Value};

use crate::error::{internal_error, invalid_argument, DlResult};

/// Name of the reserved field that turns a request into a blocking one.
pub const SYNC_FIELD: &str = "_sync";

/// A single named value inside [`Fields`].
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Json(Value),
    File {
        bytes: Bytes,
        file_name: String,
        content_type: Option<String>,
    },
    Blob {
        bytes: Bytes,
        content_type: Option<String>,
    },
    /// A rendered canvas, as a `data:` URL.
    Canvas(String),
}

impl FieldValue {
    pub fn file(bytes: impl Into<Bytes>, file_name: impl Into<String>) -> Self {
        FieldValue::File {
            bytes: bytes.into(),
            file_name: file_name.into(),
            content_type: None,
        }
    }

    pub fn blob(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        FieldValue::Blob {
            bytes: bytes.into(),
            content_type: Some(content_type.into()),
        }
    }

    pub fn canvas(data_url: impl Into<String>) -> Self {
        FieldValue::Canvas(data_url.into())
    }

    /// Whether this value forces multipart encoding. Scalars and strings never do.
    pub fn is_binary(&self) -> bool {
        !matches!(self, FieldValue::Json(_))
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Json(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Json(Value::String(value.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Json(Value::String(value))
    }
}

/// Ordered request fields that may mix JSON values and binary payloads.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(String, FieldValue)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name`, replacing an earlier value with the same name in place.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let index = self.entries.iter().position(|(existing, _)| existing == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn has_binary(&self) -> bool {
        self.entries.iter().any(|(_, value)| value.is_binary())
    }

    fn to_json(&self) -> DlResult<Value> {
        let mut object = Map::new();
        for (name, value) in &self.entries {
            match value {
                FieldValue::Json(json) => {
                    object.insert(name.clone(), json.clone());
                }
                _ => {
                    return Err(invalid_argument(format!(
                        "binary field '{name}' cannot be sent as JSON"
                    )))
                }
            }
        }
        Ok(Value::Object(object))
    }

    fn to_form(&self) -> DlResult<FormData> {
        let mut form = FormData::new();
        for (name, value) in &self.entries {
            match value {
                FieldValue::Json(Value::Null) | FieldValue::Json(Value::Array(_)) => continue,
                FieldValue::Json(Value::String(text)) => form = form.text(name, text.clone()),
                FieldValue::Json(other) => form = form.text(name, other.to_string()),
                FieldValue::File {
                    bytes,
                    file_name,
                    content_type,
                } => {
                    form = form.file(name, bytes.clone(), file_name, content_type.clone());
                }
                FieldValue::Blob {
                    bytes,
                    content_type,
                } => {
                    let file_name = blob_file_name(content_type.as_deref());
                    form = form.file(name, bytes.clone(), file_name, content_type.clone());
                }
                FieldValue::Canvas(data_url) => {
                    let (content_type, bytes) = decode_data_url(data_url)?;
                    form = form.file(name, bytes, "canvas.png", Some(content_type));
                }
            }
        }
        Ok(form)
    }
}

#[derive(Clone, Debug, PartialEq)]
struct FormPart {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

/// A pre-built multipart payload, sent untouched by the pipeline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormData {
    parts: Vec<FormPart>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart {
            name: name.into(),
            file_name: None,
            content_type: None,
            data: Bytes::from(value.into()),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        data: impl Into<Bytes>,
        file_name: impl Into<String>,
        content_type: Option<String>,
    ) -> Self {
        self.parts.push(FormPart {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type,
            data: data.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub(crate) fn encode(&self) -> (String, Vec<u8>) {
        let boundary = generate_boundary();
        let capacity = self.parts.iter().map(|part| part.data.len() + 128).sum::<usize>();
        let mut body = Vec::with_capacity(capacity + boundary.len() * 2);
        for part in &self.parts {
            let mut header = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
            if let Some(file_name) = &part.file_name {
                header.push_str(&format!("; filename=\"{file_name}\""));
                let content_type = part
                    .content_type
                    .as_deref()
                    .unwrap_or("application/octet-stream");
                header.push_str(&format!("\r\nContent-Type: {content_type}"));
            }
            push_multipart_segment(&mut body, &boundary, &header, &part.data);
        }
        finalize_multipart(&mut body, &boundary);
        (format!("multipart/form-data; boundary={boundary}"), body)
    }
}

/// Data handed to the request pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestData {
    Json(Value),
    Fields(Fields),
    Form(FormData),
}

impl From<Value> for RequestData {
    fn from(value: Value) -> Self {
        RequestData::Json(value)
    }
}

impl From<Map<String, Value>> for RequestData {
    fn from(value: Map<String, Value>) -> Self {
        RequestData::Json(Value::Object(value))
    }
}

impl From<Fields> for RequestData {
    fn from(value: Fields) -> Self {
        RequestData::Fields(value)
    }
}

impl From<FormData> for RequestData {
    fn from(value: FormData) -> Self {
        RequestData::Form(value)
    }
}

impl RequestData {
    /// Removes the reserved `_sync` field and reports whether it was truthy.
    pub(crate) fn take_sync_flag(&mut self) -> bool {
        match self {
            RequestData::Json(Value::Object(object)) => object
                .remove(SYNC_FIELD)
                .map(|flag| is_truthy(&flag))
                .unwrap_or(false),
            RequestData::Fields(fields) => match fields.remove(SYNC_FIELD) {
                Some(FieldValue::Json(flag)) => is_truthy(&flag),
                Some(_) => true,
                None => false,
            },
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum EncodedBody {
    Empty,
    Json(String),
    Multipart { content_type: String, body: Vec<u8> },
}

/// Outcome of applying the encoding policy to request data.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct EncodedPayload {
    pub query: Option<String>,
    pub body: EncodedBody,
}

/// Picks the wire encoding for `data`.
///
/// Pre-built forms go out as-is. Non-GET data with any binary field becomes multipart.
/// Everything else is JSON; GET requests carry the percent-encoded JSON in the query string.
pub(crate) fn encode_payload(is_get: bool, data: Option<RequestData>) -> DlResult<EncodedPayload> {
    let json = match data {
        None => {
            return Ok(EncodedPayload {
                query: None,
                body: EncodedBody::Empty,
            })
        }
        Some(RequestData::Form(form)) => return Ok(multipart(&form)),
        Some(RequestData::Fields(fields)) if !is_get && fields.has_binary() => {
            return Ok(multipart(&fields.to_form()?))
        }
        Some(RequestData::Fields(fields)) => fields.to_json()?,
        Some(RequestData::Json(value)) => value,
    };

    let encoded = serde_json::to_string(&json)
        .map_err(|err| internal_error(format!("failed to encode request payload: {err}")))?;
    if is_get {
        Ok(EncodedPayload {
            query: Some(encode_uri_component(&encoded)),
            body: EncodedBody::Empty,
        })
    } else {
        Ok(EncodedPayload {
            query: None,
            body: EncodedBody::Json(encoded),
        })
    }
}

fn multipart(form: &FormData) -> EncodedPayload {
    let (content_type, body) = form.encode();
    EncodedPayload {
        query: None,
        body: EncodedBody::Multipart { content_type, body },
    }
}

/// Percent-encodes everything except the characters `encodeURIComponent` leaves alone.
pub(crate) fn encode_uri_component(raw: &str) -> String {
    use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

    const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
        .remove(b'-')
        .remove(b'_')
        .remove(b'.')
        .remove(b'!')
        .remove(b'~')
        .remove(b'*')
        .remove(b'\'')
        .remove(b'(')
        .remove(b')');

    utf8_percent_encode(raw, COMPONENT).to_string()
}

/// JSON truthiness: `null`, `false`, `0`, and `""` are falsy.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Splits a `data:` URL into its media type and decoded bytes.
pub(crate) fn decode_data_url(data_url: &str) -> DlResult<(String, Bytes)> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| invalid_argument("canvas payload must be a data: URL"))?;
    let (meta, data) = rest
        .split_once(',')
        .ok_or_else(|| invalid_argument("malformed data: URL"))?;

    let (media_type, is_base64) = match meta.strip_suffix(";base64") {
        Some(media_type) => (media_type, true),
        None => (meta, false),
    };
    let media_type = if media_type.is_empty() {
        "text/plain".to_string()
    } else {
        media_type.to_string()
    };

    let bytes = if is_base64 {
        STANDARD
            .decode(data)
            .map_err(|err| invalid_argument(format!("invalid base64 in data: URL: {err}")))?
    } else {
        percent_decode_str(data).collect::<Vec<u8>>()
    };
    Ok((media_type, Bytes::from(bytes)))
}

fn blob_file_name(content_type: Option<&str>) -> String {
    let extension = content_type
        .and_then(|mime| mime.split_once('/'))
        .map(|(_, subtype)| subtype)
        .filter(|subtype| !subtype.is_empty());
    match extension {
        Some(extension) => format!("blob.{extension}"),
        None => "blob".to_string(),
    }
}

fn generate_boundary() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("----dlapi{suffix}")
}

fn push_multipart_segment(body: &mut Vec<u8>, boundary: &str, header: &str, data: &[u8]) {
    body.extend_from_slice(b"--");
    body.extend_from_slice(boundary.as_bytes());
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(header.as_bytes());
    body.extend_from_slice(b"\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
}

fn finalize_multipart(body: &mut Vec<u8>, boundary: &str) {
    body.extend_from_slice(b"--");
    body.extend_from_slice(boundary.as_bytes());
    body.extend_from_slice(b"--\r\n");
}
