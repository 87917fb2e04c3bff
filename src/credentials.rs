use std::fmt;

use secrecy::{ExposeSecret, SecretString};

/// An API key together with the secret used to key the HMAC.
///
/// The secret is only ever exposed to the signature algorithm. The `Debug`
/// implementation redacts it.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret_key: SecretString,
}

impl Credentials {
    /// Creates a new set of credentials.
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: SecretString::from(secret_key.into()),
        }
    }

    /// The public API key, sent in the clear as a query parameter.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn expose_secret(&self) -> &str {
        self.secret_key.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}
