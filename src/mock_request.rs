use std::error::Error;
use std::fmt::{self, Display};
use std::io::{BufRead, Write};

use anyhow::Context;
use http::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use http::Method;
use url::Url;

use crate::{ClientRequestLike, RequestBody, ServerRequestLike};

/// Generic error returned when the input to `from_reader` does not look like
/// a HTTP request.
#[derive(Debug)]
pub struct ParseError;

impl Error for ParseError {}
impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Malformed HTTP request")
    }
}

/// A mock request type
#[derive(Debug, Clone, PartialEq)]
pub struct MockRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl MockRequest {
    /// Returns the method used by this mock request
    pub fn method(&self) -> Method {
        self.method.clone()
    }
    /// Returns the URL used by this mock request
    pub fn url(&self) -> &Url {
        &self.url
    }
    /// Returns the path and query used by this mock request, as sent on the
    /// request line
    pub fn path(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().into(),
        }
    }
    /// Returns the headers used by this mock request
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
    /// Returns every value of the named header, in the order they were added
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }
    /// Returns the body used by this mock request
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Constructs a new mock request
    pub fn new(method: Method, url: &str) -> Self {
        let url: Url = url.parse().unwrap();

        let mut res = Self {
            method,
            url,
            headers: Default::default(),
            body: None,
        };
        if let Some(host) = res.url.host_str().map(ToOwned::to_owned) {
            res = res.with_header("Host", &host)
        }
        res
    }
    /// Convenience method for setting a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_bytes(value.as_bytes()).unwrap(),
        );
        self
    }
    /// Method for setting a request body
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        let l = body.len();
        self.body = Some(body);
        self.with_header("Content-Length", &l.to_string())
    }

    /// Parse a HTTP request into this mock request object. The URL is rebuilt
    /// from the `Host` header, defaulting to `localhost`.
    pub fn from_reader<R: BufRead>(reader: &mut R) -> Result<Self, Box<dyn Error>> {
        let mut line = String::new();

        // Read request line
        reader.read_line(&mut line)?;
        let mut parts = line.split_ascii_whitespace();

        // Extract method
        let method: Method = parts.next().ok_or(ParseError)?.parse()?;

        // Extract path and query
        let path: String = parts.next().ok_or(ParseError)?.into();

        // Extract headers
        let mut headers = HeaderMap::new();
        let has_body = loop {
            line.truncate(0);
            if reader.read_line(&mut line)? == 0 {
                break false;
            }
            if line.trim().is_empty() {
                break true;
            }

            let mut parts = line.splitn(2, ':');

            let name_str = parts.next().ok_or(ParseError)?.trim();
            let header_name: HeaderName = name_str
                .parse()
                .with_context(|| format!("{:?}", name_str))?;
            let value_str = parts.next().ok_or(ParseError)?.trim();
            let header_value: HeaderValue = value_str
                .parse()
                .with_context(|| format!("{:?}", value_str))?;
            headers.append(header_name, header_value);
        };

        let host = headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        let url = Url::parse(&format!("http://{}{}", host, path))
            .with_context(|| format!("{:?}", path))?;

        let body = if has_body {
            let mut body = Vec::new();
            reader.read_to_end(&mut body)?;
            Some(body)
        } else {
            None
        };

        Ok(Self {
            method,
            url,
            headers,
            body,
        })
    }

    /// Write out this HTTP request in standard format
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), Box<dyn Error>> {
        writeln!(writer, "{} {} HTTP/1.1", self.method.as_str(), self.path())?;
        for (header_name, header_value) in &self.headers {
            writeln!(
                writer,
                "{}: {}",
                header_name.as_str(),
                header_value.to_str()?
            )?;
        }

        if let Some(body) = &self.body {
            writeln!(writer)?;
            writer.write_all(body)?;
        }

        Ok(())
    }
}

impl ClientRequestLike for MockRequest {
    fn method(&self) -> &Method {
        &self.method
    }
    fn url(&self) -> &Url {
        &self.url
    }
    fn set_url(&mut self, url: Url) {
        self.url = url;
    }
    fn body(&mut self) -> RequestBody<'_> {
        self.body.as_deref().into()
    }
    fn append_header(&mut self, header: HeaderName, value: HeaderValue) {
        self.headers.append(header, value);
    }
}

impl ServerRequestLike for MockRequest {
    fn method(&self) -> &Method {
        &self.method
    }
    fn url(&self) -> &Url {
        &self.url
    }
    fn header(&self, header: &HeaderName) -> Option<&HeaderValue> {
        self.headers.get_all(header).iter().last()
    }
    fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// ```
    /// PUT /api/testMethod?format=json HTTP/1.1
    /// Host: www.edmunds.com
    /// Content-Type: application/json
    /// Content-Length: 23
    ///
    /// {
    ///   "action" : "read"
    /// }
    /// ```
    const RAW_REQUEST: &str = "PUT /api/testMethod?format=json HTTP/1.1\n\
        Host: www.edmunds.com\n\
        Content-Type: application/json\n\
        Content-Length: 23\n\
        \n\
        {\n  \"action\" : \"read\"\n}";

    #[test]
    fn parses_request_text() {
        let req = MockRequest::from_reader(&mut Cursor::new(RAW_REQUEST)).unwrap();

        assert_eq!(req.method(), Method::PUT);
        assert_eq!(
            req.url().as_str(),
            "http://www.edmunds.com/api/testMethod?format=json"
        );
        assert_eq!(req.header_values("content-type"), vec!["application/json"]);
        assert_eq!(req.body(), Some(&b"{\n  \"action\" : \"read\"\n}"[..]));
    }

    #[test]
    fn write_then_parse_preserves_request() {
        let req = MockRequest::new(Method::POST, "http://example.com/api/entries?a=1")
            .with_header("Content-Type", "application/json")
            .with_body(b"{\"title\":\"new entry\"}".to_vec());

        let mut written = Vec::new();
        req.write(&mut written).unwrap();
        let parsed = MockRequest::from_reader(&mut Cursor::new(written)).unwrap();

        assert_eq!(parsed, req);
    }

    #[test]
    fn missing_host_defaults_to_localhost() {
        let req = MockRequest::from_reader(&mut Cursor::new("GET /status HTTP/1.1\n")).unwrap();
        assert_eq!(req.url().as_str(), "http://localhost/status");
        assert_eq!(req.body(), None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(MockRequest::from_reader(&mut Cursor::new("")).is_err());
        assert!(MockRequest::from_reader(&mut Cursor::new("GET\n")).is_err());
    }
}
