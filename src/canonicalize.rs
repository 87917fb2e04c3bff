use std::borrow::Cow;

use http::Method;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;
use url::Url;

/// Characters escaped when appending a query parameter. Everything that
/// would change the structure of the query is escaped, so that decoding
/// the query yields the original name and value.
const QUERY_COMPONENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'%')
    .add(b'&')
    .add(b'=')
    .add(b'+');

/// The types of error which may occur whilst computing the canonical message
/// for a request.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CanonicalizeError {
    /// The URL has no hierarchical path, so it cannot be split into a path
    /// and a query.
    #[error("URL cannot be decomposed into path and query: {0}")]
    MalformedUrl(String),
    /// A percent-decoded URL component was not valid UTF-8.
    #[error("Percent-decoded {0} is not valid UTF-8")]
    EncodingFailure(&'static str),
    /// The request has a body, but it cannot be read without consuming it.
    #[error("Request body is not available for signing")]
    BodyUnavailable,
}

/// The body of a request, as far as the signer can see it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequestBody<'a> {
    /// No body.
    Empty,
    /// A fully buffered body.
    Bytes(&'a [u8]),
    /// A body exists, but is a stream which cannot be inspected.
    Unbuffered,
}

impl<'a> RequestBody<'a> {
    /// Returns the bytes that take part in the signature. An empty body is
    /// treated exactly like a missing one.
    pub fn bytes(self) -> Result<Option<&'a [u8]>, CanonicalizeError> {
        match self {
            RequestBody::Empty => Ok(None),
            RequestBody::Bytes(bytes) if bytes.is_empty() => Ok(None),
            RequestBody::Bytes(bytes) => Ok(Some(bytes)),
            RequestBody::Unbuffered => Err(CanonicalizeError::BodyUnavailable),
        }
    }
}

impl<'a> From<Option<&'a [u8]>> for RequestBody<'a> {
    fn from(other: Option<&'a [u8]>) -> Self {
        other.map_or(RequestBody::Empty, RequestBody::Bytes)
    }
}

/// A read-only view of the parts of a request that participate in the
/// signature.
#[derive(Debug, Clone)]
pub struct RequestDescription<'a> {
    method: &'a Method,
    url: &'a Url,
    body: RequestBody<'a>,
}

impl<'a> RequestDescription<'a> {
    /// Describes a request without a body.
    pub fn new(method: &'a Method, url: &'a Url) -> Self {
        Self {
            method,
            url,
            body: RequestBody::Empty,
        }
    }
    /// Set the request body
    pub fn with_body(mut self, body: impl Into<RequestBody<'a>>) -> Self {
        self.body = body.into();
        self
    }
    /// The HTTP method.
    pub fn method(&self) -> &'a Method {
        self.method
    }
    /// The URL, before the API key is appended.
    pub fn url(&self) -> &'a Url {
        self.url
    }
    /// The request body.
    pub fn body(&self) -> RequestBody<'a> {
        self.body
    }
}

/// Appends `name=value` to the query of `url`. An empty query is treated as
/// missing, so no leading `&` is produced.
pub fn append_query_param(url: &mut Url, name: &str, value: &str) {
    let pair = format!(
        "{}={}",
        utf8_percent_encode(name, QUERY_COMPONENT),
        utf8_percent_encode(value, QUERY_COMPONENT)
    );
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, pair),
        _ => pair,
    };
    url.set_query(Some(&query));
}

/// The exact message covered by the signature:
///
/// ```text
/// METHOD \n TIMESTAMP \n decoded-path ? decoded-query [\n body]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalMessage<'a> {
    head: String,
    body: Option<&'a [u8]>,
}

impl<'a> CanonicalMessage<'a> {
    /// Separates the method, the timestamp, the target and the body.
    pub const DELIMITER: &'static str = "\n";

    /// Builds the canonical message for a request whose URL already carries
    /// every query parameter that should be signed.
    pub fn new(
        method: &Method,
        timestamp: &str,
        url: &Url,
        body: Option<&'a [u8]>,
    ) -> Result<Self, CanonicalizeError> {
        if url.cannot_be_a_base() {
            return Err(CanonicalizeError::MalformedUrl(url.as_str().into()));
        }
        let path = decode_component(url.path(), "path")?;
        let query = decode_component(url.query().unwrap_or(""), "query")?;

        let head = format!(
            "{}{delimiter}{}{delimiter}{}?{}",
            method,
            timestamp,
            path,
            query,
            delimiter = Self::DELIMITER
        );

        Ok(Self {
            head,
            body: body.filter(|b| !b.is_empty()),
        })
    }

    /// Everything up to, but excluding, the body delimiter.
    pub fn head(&self) -> &str {
        &self.head
    }

    /// The body bytes, if the body takes part in the signature.
    pub fn body(&self) -> Option<&'a [u8]> {
        self.body
    }

    /// The full message as a single byte sequence.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut content = self.head.as_bytes().to_vec();
        if let Some(body) = self.body {
            content.extend(Self::DELIMITER.as_bytes());
            content.extend(body);
        }
        content
    }
}

/// Percent-decodes a URL component. Every `%` must start a two digit hex
/// escape, since a stray `%` would otherwise be signed as-is.
fn decode_component<'u>(
    component: &'u str,
    name: &'static str,
) -> Result<Cow<'u, str>, CanonicalizeError> {
    let bytes = component.as_bytes();
    let well_formed = bytes
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'%')
        .all(|(i, _)| match bytes.get(i + 1..i + 3) {
            Some(hex) => hex.iter().all(u8::is_ascii_hexdigit),
            None => false,
        });
    if !well_formed {
        return Err(CanonicalizeError::EncodingFailure(name));
    }

    percent_decode_str(component)
        .decode_utf8()
        .map_err(|_| CanonicalizeError::EncodingFailure(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(method: Method, url: &str, body: Option<&[u8]>) -> Vec<u8> {
        let url = Url::parse(url).unwrap();
        CanonicalMessage::new(&method, "2016-02-02T00:09:22Z", &url, body)
            .unwrap()
            .to_bytes()
    }

    #[test]
    fn joins_fields_with_newlines() {
        assert_eq!(
            message(Method::GET, "http://example.com/api/entries?a=1&b=2", None),
            b"GET\n2016-02-02T00:09:22Z\n/api/entries?a=1&b=2".to_vec()
        );
        assert_eq!(
            message(
                Method::POST,
                "http://example.com/api/entries?a=1",
                Some(&b"{}"[..])
            ),
            b"POST\n2016-02-02T00:09:22Z\n/api/entries?a=1\n{}".to_vec()
        );
    }

    #[test]
    fn empty_body_is_no_body() {
        assert_eq!(
            message(Method::PUT, "http://example.com/x?k=v", Some(&b""[..])),
            message(Method::PUT, "http://example.com/x?k=v", None)
        );
    }

    #[test]
    fn missing_query_still_has_separator() {
        assert_eq!(
            message(Method::GET, "http://example.com/x", None),
            b"GET\n2016-02-02T00:09:22Z\n/x?".to_vec()
        );
    }

    #[test]
    fn decodes_path_and_query() {
        assert_eq!(
            message(
                Method::GET,
                "http://example.com/with%20space/caf%C3%A9?q=a%26b&plus=1+2",
                None
            ),
            "GET\n2016-02-02T00:09:22Z\n/with space/café?q=a&b&plus=1+2"
                .as_bytes()
                .to_vec()
        );
    }

    #[test]
    fn rejects_invalid_utf8() {
        let url = Url::parse("http://example.com/x?q=%FF").unwrap();
        assert_eq!(
            CanonicalMessage::new(&Method::GET, "t", &url, None),
            Err(CanonicalizeError::EncodingFailure("query"))
        );
    }

    #[test]
    fn rejects_malformed_escapes() {
        for (url, component) in &[
            ("http://example.com/%zz", "path"),
            ("http://example.com/a%2", "path"),
            ("http://example.com/x?q=%", "query"),
            ("http://example.com/x?q=%4g&r=1", "query"),
        ] {
            let url = Url::parse(url).unwrap();
            assert_eq!(
                CanonicalMessage::new(&Method::GET, "t", &url, None),
                Err(CanonicalizeError::EncodingFailure(*component))
            );
        }

        // Escaped percent signs are fine
        let url = Url::parse("http://example.com/x?q=100%25").unwrap();
        let message = CanonicalMessage::new(&Method::GET, "t", &url, None).unwrap();
        assert_eq!(message.head(), "GET\nt\n/x?q=100%");
    }

    #[test]
    fn rejects_urls_without_path() {
        let url = Url::parse("mailto:someone@example.com").unwrap();
        assert!(matches!(
            CanonicalMessage::new(&Method::GET, "t", &url, None),
            Err(CanonicalizeError::MalformedUrl(_))
        ));
    }

    #[test]
    fn appends_query_params() {
        let mut url = Url::parse("http://example.com/api/entries").unwrap();
        append_query_param(&mut url, "apiKey", "a+b/c=");
        assert_eq!(url.query(), Some("apiKey=a%2Bb/c%3D"));

        let mut url = Url::parse("http://example.com/api/entries?").unwrap();
        append_query_param(&mut url, "apiKey", "key");
        assert_eq!(url.as_str(), "http://example.com/api/entries?apiKey=key");

        let mut url = Url::parse("http://example.com/api/entries?z=1&a=2").unwrap();
        append_query_param(&mut url, "apiKey", "key");
        assert_eq!(url.query(), Some("z=1&a=2&apiKey=key"));
    }

    #[test]
    fn appended_values_decode_to_original() {
        let mut url = Url::parse("http://example.com/p").unwrap();
        append_query_param(&mut url, "apiKey", "a b&c=d+e%f");
        let message = CanonicalMessage::new(&Method::GET, "t", &url, None).unwrap();
        assert_eq!(message.head(), "GET\nt\n/p?apiKey=a b&c=d+e%f");
    }

    #[test]
    fn unbuffered_body_cannot_be_signed() {
        assert_eq!(
            RequestBody::Unbuffered.bytes(),
            Err(CanonicalizeError::BodyUnavailable)
        );
        assert_eq!(RequestBody::Bytes(b"").bytes(), Ok(None));
        assert_eq!(RequestBody::from(Some(&b"x"[..])).bytes(), Ok(Some(&b"x"[..])));
    }
}
