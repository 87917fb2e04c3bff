use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue, InvalidHeaderValue};
use http::Method;
use thiserror::Error;
use url::Url;

use crate::algorithm::{HmacSha256, HttpSignature, SignatureEncoding};
use crate::canonicalize::{
    append_query_param, CanonicalMessage, CanonicalizeError, RequestBody, RequestDescription,
};
use crate::credentials::Credentials;
use crate::timestamp;
use crate::{
    DEFAULT_API_KEY_PARAM, DEFAULT_PROTOCOL_VERSION, DEFAULT_SIGNATURE_HEADER,
    DEFAULT_TIMESTAMP_HEADER, DEFAULT_VERSION_HEADER,
};

/// This trait is to be implemented for types representing an outgoing
/// HTTP request. The signing extension methods are available on any type
/// implementing this trait.
pub trait ClientRequestLike {
    /// Returns the request method.
    fn method(&self) -> &Method;
    /// Returns the request URL, including the query.
    fn url(&self) -> &Url;
    /// Replaces the request URL.
    fn set_url(&mut self, url: Url);
    /// Returns the request body. Implementations may buffer the body in order
    /// to return it, and should return `RequestBody::Unbuffered` if a body is
    /// present but cannot be read.
    fn body(&mut self) -> RequestBody<'_>;
    /// Adds a header value, keeping any existing values for the same header.
    fn append_header(&mut self, header: HeaderName, value: HeaderValue);
}

/// The types of error which may occur whilst signing a request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SigningError {
    /// The URL cannot be split into a path and a query.
    #[error("URL cannot be decomposed into path and query: {0}")]
    MalformedUrl(String),
    /// A percent-decoded URL component was not valid UTF-8.
    #[error("Percent-decoded {0} is not valid UTF-8")]
    EncodingFailure(&'static str),
    /// The canonical message or the digest could not be produced.
    #[error("Signature unavailable: {0}")]
    SignatureUnavailable(&'static str),
    /// A computed annotation is not a valid header value.
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] InvalidHeaderValue),
}

impl From<CanonicalizeError> for SigningError {
    fn from(other: CanonicalizeError) -> Self {
        match other {
            CanonicalizeError::MalformedUrl(url) => SigningError::MalformedUrl(url),
            CanonicalizeError::EncodingFailure(component) => {
                SigningError::EncodingFailure(component)
            }
            CanonicalizeError::BodyUnavailable => {
                SigningError::SignatureUnavailable("request body cannot be read")
            }
        }
    }
}

/// The wire contract shared by a signer and the server verifying its
/// requests.
///
/// Configuration is built up front and then handed to a `RequestSigner`,
/// which only ever exposes it by shared reference.
#[derive(Debug, Clone)]
pub struct SignerConfig {
    api_key_param: String,
    signature_header: HeaderName,
    timestamp_header: HeaderName,
    version_header: HeaderName,
    version: HeaderValue,
    encoding: SignatureEncoding,
    sign_body: bool,
    allow_unsigned: bool,
}

impl Default for SignerConfig {
    fn default() -> Self {
        SignerConfig {
            api_key_param: DEFAULT_API_KEY_PARAM.into(),
            signature_header: HeaderName::from_static(DEFAULT_SIGNATURE_HEADER),
            timestamp_header: HeaderName::from_static(DEFAULT_TIMESTAMP_HEADER),
            version_header: HeaderName::from_static(DEFAULT_VERSION_HEADER),
            version: HeaderValue::from_static(DEFAULT_PROTOCOL_VERSION),
            encoding: SignatureEncoding::Standard,
            sign_body: true,
            allow_unsigned: false,
        }
    }
}

impl SignerConfig {
    /// Creates a configuration using the default names, standard base64 and
    /// body signing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the name of the query parameter carrying the API key.
    ///
    /// This is `apiKey` by default.
    pub fn api_key_param(&self) -> &str {
        &self.api_key_param
    }
    /// Controls the name of the query parameter carrying the API key.
    pub fn with_api_key_param(mut self, api_key_param: impl Into<String>) -> Self {
        self.api_key_param = api_key_param.into();
        self
    }

    /// Returns the name of the signature header.
    ///
    /// This is `X-Auth-Signature` by default.
    pub fn signature_header(&self) -> &HeaderName {
        &self.signature_header
    }
    /// Controls the name of the signature header.
    pub fn with_signature_header(mut self, signature_header: HeaderName) -> Self {
        self.signature_header = signature_header;
        self
    }

    /// Returns the name of the timestamp header.
    ///
    /// This is `X-Auth-Timestamp` by default.
    pub fn timestamp_header(&self) -> &HeaderName {
        &self.timestamp_header
    }
    /// Controls the name of the timestamp header.
    pub fn with_timestamp_header(mut self, timestamp_header: HeaderName) -> Self {
        self.timestamp_header = timestamp_header;
        self
    }

    /// Returns the name of the version header.
    ///
    /// This is `X-Auth-Version` by default.
    pub fn version_header(&self) -> &HeaderName {
        &self.version_header
    }
    /// Controls the name of the version header.
    pub fn with_version_header(mut self, version_header: HeaderName) -> Self {
        self.version_header = version_header;
        self
    }

    /// Returns the protocol version sent in the version header.
    ///
    /// This is `1` by default.
    pub fn version(&self) -> &HeaderValue {
        &self.version
    }
    /// Controls the protocol version sent in the version header.
    pub fn with_version(mut self, version: HeaderValue) -> Self {
        self.version = version;
        self
    }

    /// Returns how the signature is encoded.
    pub fn encoding(&self) -> SignatureEncoding {
        self.encoding
    }
    /// Controls how the signature is encoded.
    pub fn with_encoding(mut self, encoding: SignatureEncoding) -> Self {
        self.encoding = encoding;
        self
    }
    /// Shorthand for choosing between `SignatureEncoding::UrlSafe` and
    /// `SignatureEncoding::Standard`.
    pub fn with_url_safe_base64(self, url_safe: bool) -> Self {
        self.with_encoding(if url_safe {
            SignatureEncoding::UrlSafe
        } else {
            SignatureEncoding::Standard
        })
    }

    /// Returns whether a non-empty request body is part of the signature.
    ///
    /// This is set to `true` by default. Both sides must agree on it.
    pub fn sign_body(&self) -> bool {
        self.sign_body
    }
    /// Controls whether a non-empty request body is part of the signature.
    pub fn with_sign_body(mut self, sign_body: bool) -> Self {
        self.sign_body = sign_body;
        self
    }

    /// Returns whether a request may be sent without a signature header when
    /// the signature cannot be produced.
    ///
    /// This is set to `false` by default.
    pub fn allow_unsigned(&self) -> bool {
        self.allow_unsigned
    }
    /// Controls whether a request may be sent without a signature header when
    /// the signature cannot be produced. The API key, timestamp and version
    /// are still added.
    pub fn with_allow_unsigned(mut self, allow_unsigned: bool) -> Self {
        self.allow_unsigned = allow_unsigned;
        self
    }
}

/// Everything `RequestSigner` adds to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedAnnotations {
    url: Url,
    api_key_param: (String, String),
    timestamp: (HeaderName, HeaderValue),
    signature: Option<(HeaderName, HeaderValue)>,
    version: (HeaderName, HeaderValue),
}

impl SignedAnnotations {
    /// The request URL with the API key appended to its query.
    pub fn url(&self) -> &Url {
        &self.url
    }
    /// The name and value of the API key query parameter.
    pub fn api_key_param(&self) -> (&str, &str) {
        (&self.api_key_param.0, &self.api_key_param.1)
    }
    /// The timestamp header value.
    pub fn timestamp(&self) -> &HeaderValue {
        &self.timestamp.1
    }
    /// The encoded signature, if one could be produced.
    pub fn signature(&self) -> Option<&HeaderValue> {
        self.signature.as_ref().map(|(_, value)| value)
    }
    /// The version header value.
    pub fn version(&self) -> &HeaderValue {
        &self.version.1
    }
    /// The headers to add, in the order they are added.
    pub fn headers(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        Some(&self.timestamp)
            .into_iter()
            .chain(self.signature.as_ref())
            .chain(Some(&self.version))
            .map(|(name, value)| (name, value))
    }

    /// Applies the annotations to a request.
    pub fn apply<R: ClientRequestLike + ?Sized>(self, request: &mut R) {
        request.set_url(self.url);
        let (name, value) = self.timestamp;
        request.append_header(name, value);
        if let Some((name, value)) = self.signature {
            request.append_header(name, value);
        }
        let (name, value) = self.version;
        request.append_header(name, value);
    }
}

/// Signs requests with a fixed API key, signature algorithm and
/// configuration.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    api_key: String,
    signature: Arc<dyn HttpSignature>,
    config: SignerConfig,
}

impl RequestSigner {
    /// Creates a signer using HMAC-SHA256 keyed with the secret.
    pub fn new(credentials: Credentials, config: SignerConfig) -> Self {
        let signature = HmacSha256::new(credentials.expose_secret().as_bytes());
        Self::with_algorithm(credentials.api_key(), signature, config)
    }

    /// Creates a signer using a custom signature algorithm.
    pub fn with_algorithm<SigAlg: HttpSignature>(
        api_key: &str,
        signature: SigAlg,
        config: SignerConfig,
    ) -> Self {
        RequestSigner {
            api_key: api_key.into(),
            signature: Arc::new(signature),
            config,
        }
    }

    /// The API key added to every request.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
    /// The signature algorithm.
    pub fn algorithm(&self) -> &dyn HttpSignature {
        &*self.signature
    }
    /// The configuration in use.
    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// Computes the annotations for a request without modifying anything.
    ///
    /// The result depends only on the method, the timestamp, the URL, the
    /// body and the secret, so independent calls with the same inputs agree.
    pub fn sign_request(
        &self,
        request: &RequestDescription,
        timestamp: &str,
    ) -> Result<SignedAnnotations, SigningError> {
        let mut url = request.url().clone();
        append_query_param(&mut url, &self.config.api_key_param, &self.api_key);

        let timestamp_value = HeaderValue::from_str(timestamp)?;

        let signature = self.signature_for(request.method(), timestamp, &url, request.body());
        let signature = match signature {
            Ok(signature) => Some(signature),
            Err(SigningError::SignatureUnavailable(reason)) if self.config.allow_unsigned => {
                warn!(
                    "Sending {} {} without a signature: {}",
                    request.method(),
                    url.path(),
                    reason
                );
                None
            }
            Err(e) => return Err(e),
        };

        Ok(SignedAnnotations {
            api_key_param: (self.config.api_key_param.clone(), self.api_key.clone()),
            url,
            timestamp: (self.config.timestamp_header.clone(), timestamp_value),
            signature: signature.map(|value| (self.config.signature_header.clone(), value)),
            version: (
                self.config.version_header.clone(),
                self.config.version.clone(),
            ),
        })
    }

    /// Signs a request in place using the current time.
    pub fn encode_request<R: ClientRequestLike + ?Sized>(
        &self,
        request: &mut R,
    ) -> Result<(), SigningError> {
        self.encode_request_at(request, Utc::now())
    }

    /// Signs a request in place using the given time. On error the request is
    /// left untouched.
    pub fn encode_request_at<R: ClientRequestLike + ?Sized>(
        &self,
        request: &mut R,
        instant: DateTime<Utc>,
    ) -> Result<(), SigningError> {
        let timestamp = timestamp::format_timestamp(instant);
        let method = request.method().clone();
        let url = request.url().clone();

        let annotations = {
            let body = if self.config.sign_body {
                request.body()
            } else {
                RequestBody::Empty
            };
            let description = RequestDescription::new(&method, &url).with_body(body);
            self.sign_request(&description, &timestamp)?
        };

        debug!(
            "Signed {} {} at {} using {} (signature header present: {})",
            method,
            url.path(),
            timestamp,
            self.signature.name(),
            annotations.signature().is_some()
        );

        annotations.apply(request);
        Ok(())
    }

    fn signature_for(
        &self,
        method: &Method,
        timestamp: &str,
        url: &Url,
        body: RequestBody,
    ) -> Result<HeaderValue, SigningError> {
        let body = if self.config.sign_body {
            body.bytes()?
        } else {
            None
        };
        let message = CanonicalMessage::new(method, timestamp, url, body)?;
        let signature = self.signature.http_sign(&message);
        Ok(HeaderValue::from_str(
            &self.config.encoding.encode(&signature),
        )?)
    }
}

/// Import this trait to get access to the `sign` method on all types
/// implementing `ClientRequestLike`.
pub trait SigningExt: Sized {
    /// Consumes the request and returns it signed.
    fn signed(mut self, signer: &RequestSigner) -> Result<Self, SigningError> {
        self.sign(signer)?;
        Ok(self)
    }

    /// Signs the request in place using the current time.
    fn sign(&mut self, signer: &RequestSigner) -> Result<(), SigningError>;

    /// Signs the request in place using the given time.
    fn sign_at(
        &mut self,
        signer: &RequestSigner,
        instant: DateTime<Utc>,
    ) -> Result<(), SigningError>;
}

impl<R: ClientRequestLike> SigningExt for R {
    fn sign(&mut self, signer: &RequestSigner) -> Result<(), SigningError> {
        signer.encode_request(self)
    }

    fn sign_at(
        &mut self,
        signer: &RequestSigner,
        instant: DateTime<Utc>,
    ) -> Result<(), SigningError> {
        signer.encode_request_at(self, instant)
    }
}
