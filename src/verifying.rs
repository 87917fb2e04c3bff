use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue};
use http::Method;
use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

use crate::algorithm::{HmacSha256, HttpSignature};
use crate::canonicalize::{CanonicalMessage, CanonicalizeError};
use crate::credentials::Credentials;
use crate::signing::SignerConfig;
use crate::timestamp;

/// The reasons a request can fail verification. Any of them means the
/// request should be rejected.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VerifyingError {
    /// The API key query parameter is missing.
    #[error("Missing API key query parameter `{0}`")]
    MissingApiKey(String),
    /// One of the authentication headers is missing or not valid text.
    #[error("Missing or unreadable header `{0}`")]
    MissingHeader(HeaderName),
    /// The version header does not match the expected protocol version.
    #[error("Unsupported protocol version {0:?}")]
    UnsupportedVersion(HeaderValue),
    /// No key is known for the API key.
    #[error("Unknown API key")]
    UnknownApiKey,
    /// The timestamp header does not use the timestamp wire format.
    #[error("Malformed timestamp {0:?}")]
    MalformedTimestamp(String),
    /// The timestamp is too far from the current time.
    #[error("Timestamp {0} is outside the allowed leeway")]
    TimestampOutOfRange(String),
    /// The signature header is not valid in the configured encoding.
    #[error("Malformed signature")]
    MalformedSignature,
    /// The canonical message could not be rebuilt.
    #[error(transparent)]
    Canonicalize(#[from] CanonicalizeError),
    /// The signature does not match the request.
    #[error("Signature mismatch")]
    SignatureMismatch,
}

/// The verification process will use this trait to find the key belonging
/// to the API key sent with a request.
///
/// You do not need to implement this yourself: the `SimpleKeyProvider` type
/// should be suitable for many situations.
pub trait KeyProvider: Debug + Sync + Send + 'static {
    /// Returns the signature algorithm keyed with the secret for `api_key`,
    /// or `None` if the API key is unknown.
    fn provide_key(&self, api_key: &str) -> Option<&dyn HttpSignature>;
}

/// Implementation of a simple in-memory key store.
#[derive(Debug, Default, Clone)]
pub struct SimpleKeyProvider {
    keys: HashMap<String, Arc<dyn HttpSignature>>,
}

impl SimpleKeyProvider {
    /// Initializes the key store from a list of credentials, keying
    /// HMAC-SHA256 with each secret.
    pub fn new<I: IntoIterator<Item = Credentials>>(credentials: I) -> Self {
        let mut res = Self::default();
        for credentials in credentials {
            res.add(&credentials);
        }
        res
    }

    /// Adds credentials to the key store, replacing any existing key for the
    /// same API key.
    pub fn add(&mut self, credentials: &Credentials) {
        self.add_key(
            credentials.api_key(),
            HmacSha256::new(credentials.expose_secret().as_bytes()),
        );
    }
    /// Adds a custom signature algorithm for an API key.
    pub fn add_key<K: HttpSignature>(&mut self, api_key: &str, key: K) {
        self.keys.insert(api_key.into(), Arc::new(key));
    }
    /// Clears all keys from the key store
    pub fn clear(&mut self) {
        self.keys.clear();
    }
    /// Removes the key for the specified API key from the key store
    pub fn remove(&mut self, api_key: &str) {
        self.keys.remove(api_key);
    }
}

impl KeyProvider for SimpleKeyProvider {
    fn provide_key(&self, api_key: &str) -> Option<&dyn HttpSignature> {
        self.keys.get(api_key).map(|key| &**key)
    }
}

/// The configuration used for verifying HTTP requests.
#[derive(Debug, Clone)]
pub struct VerifyingConfig {
    key_provider: Arc<dyn KeyProvider>,
    wire: SignerConfig,
    validate_timestamp: bool,
    timestamp_leeway: Duration,
}

impl VerifyingConfig {
    /// Creates a new verifying configuration using the given key provider
    /// and the default wire contract.
    pub fn new<KP: KeyProvider>(key_provider: KP) -> Self {
        VerifyingConfig {
            key_provider: Arc::new(key_provider),
            wire: SignerConfig::default(),
            validate_timestamp: true,
            timestamp_leeway: Duration::from_secs(300),
        }
    }

    /// Returns the key provider.
    pub fn key_provider(&self) -> &dyn KeyProvider {
        &*self.key_provider
    }
    /// Returns the wire contract expected from clients: parameter and header
    /// names, protocol version, signature encoding and body signing. The
    /// `allow_unsigned` setting is ignored.
    pub fn wire(&self) -> &SignerConfig {
        &self.wire
    }
    /// Controls the wire contract expected from clients (in-place).
    pub fn set_wire(&mut self, wire: SignerConfig) -> &mut Self {
        self.wire = wire;
        self
    }
    /// Controls the wire contract expected from clients.
    pub fn with_wire(mut self, wire: SignerConfig) -> Self {
        self.set_wire(wire);
        self
    }
    /// Returns whether the timestamp header will be compared against the
    /// current date and time.
    ///
    /// This is set to `true` by default.
    pub fn validate_timestamp(&self) -> bool {
        self.validate_timestamp
    }
    /// Controls whether the timestamp header will be compared against the
    /// current date and time (in-place).
    pub fn set_validate_timestamp(&mut self, validate_timestamp: bool) -> &mut Self {
        self.validate_timestamp = validate_timestamp;
        self
    }
    /// Controls whether the timestamp header will be compared against the
    /// current date and time.
    pub fn with_validate_timestamp(mut self, validate_timestamp: bool) -> Self {
        self.set_validate_timestamp(validate_timestamp);
        self
    }
    /// Returns the amount of leeway allowed in either direction when comparing
    /// the timestamp against the current date and time.
    ///
    /// This is set to 5 minutes by default.
    pub fn timestamp_leeway(&self) -> Duration {
        self.timestamp_leeway
    }
    /// Controls the amount of leeway allowed in either direction when
    /// comparing the timestamp against the current date and time (in-place).
    pub fn set_timestamp_leeway(&mut self, timestamp_leeway: Duration) -> &mut Self {
        self.timestamp_leeway = timestamp_leeway;
        self
    }
    /// Controls the amount of leeway allowed in either direction when
    /// comparing the timestamp against the current date and time.
    pub fn with_timestamp_leeway(mut self, timestamp_leeway: Duration) -> Self {
        self.set_timestamp_leeway(timestamp_leeway);
        self
    }
}

/// This trait is to be implemented for types representing an incoming
/// HTTP request. The verification extension methods are available on any
/// type implementing this trait.
pub trait ServerRequestLike {
    /// Returns the request method.
    fn method(&self) -> &Method;
    /// Returns the request URL as received, including the query.
    fn url(&self) -> &Url;
    /// Returns the last value of the given header, or `None` if it's not set.
    fn header(&self, header: &HeaderName) -> Option<&HeaderValue>;
    /// Returns the request body, if there is one.
    fn body(&self) -> Option<&[u8]>;
}

/// Import this trait to get access to the `verify` method on all types
/// implementing `ServerRequestLike`.
pub trait VerifyingExt {
    /// Verify the request against the current time.
    fn verify(&self, config: &VerifyingConfig) -> Result<(), VerifyingError> {
        self.verify_at(config, Utc::now())
    }

    /// Verify the request, comparing its timestamp against `now`.
    fn verify_at(
        &self,
        config: &VerifyingConfig,
        now: DateTime<Utc>,
    ) -> Result<(), VerifyingError>;
}

impl<T: ServerRequestLike + ?Sized> VerifyingExt for T {
    fn verify_at(
        &self,
        config: &VerifyingConfig,
        now: DateTime<Utc>,
    ) -> Result<(), VerifyingError> {
        let res = verify_request(self, config, now);
        if let Err(e) = &res {
            debug!("Rejected {} {}: {}", self.method(), self.url().path(), e);
        }
        res
    }
}

fn verify_request<T: ServerRequestLike + ?Sized>(
    req: &T,
    config: &VerifyingConfig,
    now: DateTime<Utc>,
) -> Result<(), VerifyingError> {
    let wire = &config.wire;

    let api_key = last_query_param(req.url(), wire.api_key_param())
        .ok_or_else(|| VerifyingError::MissingApiKey(wire.api_key_param().into()))?;

    let version = required_header(req, wire.version_header())?;
    if version != wire.version() {
        return Err(VerifyingError::UnsupportedVersion(version.clone()));
    }

    let timestamp_value = required_header(req, wire.timestamp_header())?
        .to_str()
        .map_err(|_| VerifyingError::MissingHeader(wire.timestamp_header().clone()))?;
    let provided_timestamp = timestamp::parse_timestamp(timestamp_value)
        .ok_or_else(|| VerifyingError::MalformedTimestamp(timestamp_value.into()))?;

    let provided_signature = required_header(req, wire.signature_header())?
        .to_str()
        .ok()
        .and_then(|value| wire.encoding().decode(value))
        .ok_or(VerifyingError::MalformedSignature)?;

    let key = config
        .key_provider
        .provide_key(&api_key)
        .ok_or(VerifyingError::UnknownApiKey)?;

    let body = if wire.sign_body() { req.body() } else { None };
    let message = CanonicalMessage::new(req.method(), timestamp_value, req.url(), body)?;

    if !key.http_verify(&message, &provided_signature) {
        return Err(VerifyingError::SignatureMismatch);
    }

    if config.validate_timestamp {
        let chrono_delta = provided_timestamp.signed_duration_since(now);
        let delta = chrono_delta
            .to_std()
            .or_else(|_| (-chrono_delta).to_std())
            .map_err(|_| VerifyingError::TimestampOutOfRange(timestamp_value.into()))?;

        if delta > config.timestamp_leeway {
            return Err(VerifyingError::TimestampOutOfRange(timestamp_value.into()));
        }
    }

    Ok(())
}

fn required_header<'r, T: ServerRequestLike + ?Sized>(
    req: &'r T,
    header: &HeaderName,
) -> Result<&'r HeaderValue, VerifyingError> {
    req.header(header)
        .ok_or_else(|| VerifyingError::MissingHeader(header.clone()))
}

/// Finds the last occurrence of a query parameter. Only percent-decoding is
/// applied, so `+` is not read as a space.
fn last_query_param<'u>(url: &'u Url, name: &str) -> Option<Cow<'u, str>> {
    url.query()?
        .split('&')
        .filter_map(|pair| {
            let mut kv = pair.splitn(2, '=');
            let k = percent_decode_str(kv.next()?).decode_utf8().ok()?;
            let v = percent_decode_str(kv.next().unwrap_or("")).decode_utf8().ok()?;
            if k == name {
                Some(v)
            } else {
                None
            }
        })
        .last()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::mock_request::MockRequest;
    use crate::signing::tests::{signer, API_KEY, PRETTY_READ_BODY, SECRET_KEY, TEST_URL};
    use crate::SigningExt;

    fn signed_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 2, 2, 0, 9, 22).single().unwrap()
    }

    fn config(wire: SignerConfig) -> VerifyingConfig {
        VerifyingConfig::new(SimpleKeyProvider::new(vec![Credentials::new(
            API_KEY, SECRET_KEY,
        )]))
        .with_wire(wire)
    }

    fn signed_request(wire: &SignerConfig) -> MockRequest {
        let mut req =
            MockRequest::new(Method::PUT, TEST_URL).with_body(PRETTY_READ_BODY.to_vec());
        req.sign_at(&signer(wire.clone()), signed_at()).unwrap();
        req
    }

    #[test]
    fn accepts_signed_request() {
        for wire in &[
            SignerConfig::new(),
            SignerConfig::new().with_url_safe_base64(true),
            SignerConfig::new().with_sign_body(false),
        ] {
            let req = signed_request(wire);
            req.verify_at(&config(wire.clone()), signed_at())
                .expect("Signature to be verified correctly");
        }
    }

    #[test]
    fn accepts_request_signed_twice() {
        let wire = SignerConfig::new();
        let mut req = signed_request(&wire);
        req.sign_at(&signer(wire.clone()), signed_at()).unwrap();

        req.verify_at(&config(wire), signed_at())
            .expect("Signature to be verified correctly");
    }

    #[test]
    fn rejects_tampered_body() {
        let wire = SignerConfig::new();
        let req = signed_request(&wire);
        let mut written = Vec::new();
        req.write(&mut written).unwrap();
        let tampered = String::from_utf8(written).unwrap().replace("read", "kill");
        let tampered = MockRequest::from_reader(&mut tampered.as_bytes()).unwrap();

        assert!(matches!(
            tampered.verify_at(&config(wire), signed_at()),
            Err(VerifyingError::SignatureMismatch)
        ));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let wire = SignerConfig::new();
        let req = signed_request(&wire);
        let later = signed_at() + chrono::Duration::minutes(10);

        assert!(matches!(
            req.verify_at(&config(wire.clone()), later),
            Err(VerifyingError::TimestampOutOfRange(_))
        ));
        req.verify_at(&config(wire).with_validate_timestamp(false), later)
            .expect("Timestamp to be ignored");
    }

    #[test]
    fn rejects_unknown_key_and_foreign_encoding() {
        let wire = SignerConfig::new().with_url_safe_base64(true);
        let req = signed_request(&wire);

        let empty = VerifyingConfig::new(SimpleKeyProvider::default()).with_wire(wire);
        assert!(matches!(
            req.verify_at(&empty, signed_at()),
            Err(VerifyingError::UnknownApiKey)
        ));

        let standard_only = req.with_header("X-Auth-Signature", "-_-_");
        assert!(matches!(
            standard_only.verify_at(&config(SignerConfig::new()), signed_at()),
            Err(VerifyingError::MalformedSignature)
        ));
    }

    #[test]
    fn rejects_missing_annotations() {
        let unsigned = MockRequest::new(Method::GET, TEST_URL);
        assert!(matches!(
            unsigned.verify_at(&config(SignerConfig::new()), signed_at()),
            Err(VerifyingError::MissingApiKey(_))
        ));

        let wrong_version = signed_request(&SignerConfig::new()).with_header("X-Auth-Version", "2");
        assert!(matches!(
            wrong_version.verify_at(&config(SignerConfig::new()), signed_at()),
            Err(VerifyingError::UnsupportedVersion(v)) if v == HeaderValue::from_static("2")
        ));
    }

    #[test]
    fn query_param_lookup_keeps_plus() {
        let url = Url::parse("http://example.com/?apiKey=a+b&x=1&apiKey=c%2Bd").unwrap();
        assert_eq!(last_query_param(&url, "apiKey").as_deref(), Some("c+d"));
        assert_eq!(last_query_param(&url, "missing"), None);

        let url = Url::parse("http://example.com/?apiKey=a+b").unwrap();
        assert_eq!(last_query_param(&url, "apiKey").as_deref(), Some("a+b"));
    }
}
