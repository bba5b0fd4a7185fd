pub mod compact;
pub mod tagged;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

const VALIDATION_HEADER: &str = "Um ou mais erros na requisição:";

/// Bodies shorter than this are encoded in full; longer ones are sampled.
pub const SAMPLE_THRESHOLD: usize = 12;

/// Raw request body as handed over by the transport layer.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Bytes(Bytes),
    /// A body that was already decoded to text by the caller. The HTTP
    /// handler always passes raw bytes; this variant keeps the non-bytes
    /// rejection expressible for other callers. Fingerprints are only
    /// defined over raw bytes, so it always fails validation.
    Text(String),
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

/// The request attributes a fingerprint is computed from. Every field is
/// optional here; [`RequestAttributes::validate`] decides what is usable.
#[derive(Debug, Clone, Default)]
pub struct RequestAttributes {
    pub host: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<RequestBody>,
    pub path: Option<String>,
    pub method: Option<String>,
}

/// A request that passed validation. Borrowed so the body is never copied.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedRequest<'a> {
    pub host: &'a str,
    pub content_type: &'a str,
    pub body: &'a [u8],
    pub path: &'a str,
    pub method: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingHost,
    MissingContentType,
    MissingBody,
    BodyNotBytes,
    MissingPath,
    MissingMethod,
}

impl ValidationIssue {
    pub fn message(&self) -> &'static str {
        match self {
            ValidationIssue::MissingHost => "Host da requisição inexistente!",
            ValidationIssue::MissingContentType => "Cabeçalho Content-Type inexistente!",
            ValidationIssue::MissingBody => "Corpo da requisição inexistente!",
            ValidationIssue::BodyNotBytes => "Corpo da requisição não é uma sequência de bytes!",
            ValidationIssue::MissingPath => "URL endpoint da requisição inexistente!",
            ValidationIssue::MissingMethod => "Método HTTP da requisição inexistente!",
        }
    }
}

/// Every precondition the request failed, in field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(VALIDATION_HEADER)?;
        for issue in &self.issues {
            write!(f, "\n{}", issue.message())?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl RequestAttributes {
    pub fn validate(&self) -> Result<ValidatedRequest<'_>, ValidationError> {
        let mut issues = Vec::new();

        let host = present(&self.host);
        if host.is_none() {
            issues.push(ValidationIssue::MissingHost);
        }

        let content_type = present(&self.content_type);
        if content_type.is_none() {
            issues.push(ValidationIssue::MissingContentType);
        }

        let body = match &self.body {
            Some(RequestBody::Bytes(bytes)) if !bytes.is_empty() => Some(bytes.as_ref()),
            Some(RequestBody::Bytes(_)) | None => {
                issues.push(ValidationIssue::MissingBody);
                None
            }
            Some(RequestBody::Text(_)) => {
                issues.push(ValidationIssue::BodyNotBytes);
                None
            }
        };

        let path = present(&self.path);
        if path.is_none() {
            issues.push(ValidationIssue::MissingPath);
        }

        let method = present(&self.method);
        if method.is_none() {
            issues.push(ValidationIssue::MissingMethod);
        }

        match (host, content_type, body, path, method) {
            (Some(host), Some(content_type), Some(body), Some(path), Some(method)) => {
                Ok(ValidatedRequest {
                    host,
                    content_type,
                    body,
                    path,
                    method,
                })
            }
            _ => Err(ValidationError { issues }),
        }
    }
}

/// Positions sampled from bodies of at least [`SAMPLE_THRESHOLD`] bytes:
/// the first four, the three around the midpoint, then the last four
/// walking backwards.
pub(crate) fn sample_positions(len: usize) -> [usize; 11] {
    debug_assert!(len >= SAMPLE_THRESHOLD);
    let last = len - 1;
    let mid = last / 2;
    [
        0,
        1,
        2,
        3,
        mid - 1,
        mid,
        mid + 1,
        last,
        last - 1,
        last - 2,
        last - 3,
    ]
}

/// Fingerprint encoding in use. Both are deterministic; they are not
/// compatible with each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scheme {
    /// Fixed-width segments with provenance tags (172 digits).
    #[default]
    Tagged,
    /// Plain hex concatenation without padding.
    Compact,
}

impl Scheme {
    pub fn encode(&self, request: &ValidatedRequest<'_>) -> String {
        match self {
            Scheme::Tagged => tagged::encode(request),
            Scheme::Compact => compact::encode(request),
        }
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tagged" => Ok(Scheme::Tagged),
            "compact" => Ok(Scheme::Compact),
            other => Err(format!("unknown fingerprint scheme '{other}'")),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Tagged => write!(f, "tagged"),
            Scheme::Compact => write!(f, "compact"),
        }
    }
}
