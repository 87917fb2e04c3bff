#![deny(missing_docs)]
//! HMAC-SHA256 request signing for HTTP APIs authenticated by an API key.
//!
//! Signing a request adds four annotations:
//!
//! - an `apiKey` query parameter carrying the API key,
//! - an `X-Auth-Timestamp` header (`yyyy-MM-dd'T'HH:mm:ss'Z'`, UTC),
//! - an `X-Auth-Signature` header with the base64 HMAC-SHA256 of the
//!   canonical message (see `CanonicalMessage`),
//! - an `X-Auth-Version` header naming the protocol version.
//!
//! The parameter name, header names, version and signature encoding are all
//! configurable through `SignerConfig`. Servers can check incoming requests
//! with `VerifyingExt`.
//!
//! ## Features
//!
//! This crate is intended to be used with multiple different HTTP clients.
//! As such, client-specific implementations are gated by correspondingly
//! named features.
//!
//! ### Supported crates:
//!
//! | Crate / Feature name                              | Client/Server | Notes                                                         |
//! | ------------------------------------------------- | ------------- | ------------------------------------------------------------- |
//! | [reqwest](https://crates.io/crates/reqwest)       | Client        | Supports blocking and non-blocking requests.<sup>1</sup>      |
//!
//! 1. Streaming bodies cannot be read without consuming them, so such
//!    requests can only be sent unsigned, and only if the signer allows it.
//!
//! ## Example usage (reqwest)
//!
//! ```rust,no_run
//! use http_hmac::*;
//!
//! let signer = RequestSigner::new(
//!     Credentials::new("my-api-key", "my-secret-key"),
//!     SignerConfig::new().with_url_safe_base64(true),
//! );
//!
//! let client = reqwest::blocking::Client::new();
//!
//! let req = client
//!     .get("http://localhost:8080/api/entries?format=json")
//!     .build()
//!     .unwrap()
//!     .signed(&signer)
//!     .unwrap();
//!
//! let result = client.execute(req).unwrap();
//! ```

#[macro_use]
mod macros;

/// Default name of the query parameter carrying the API key.
pub const DEFAULT_API_KEY_PARAM: &str = "apiKey";
/// Default name of the signature header (`X-Auth-Signature`).
pub const DEFAULT_SIGNATURE_HEADER: &str = "x-auth-signature";
/// Default name of the timestamp header (`X-Auth-Timestamp`).
pub const DEFAULT_TIMESTAMP_HEADER: &str = "x-auth-timestamp";
/// Default name of the version header (`X-Auth-Version`).
pub const DEFAULT_VERSION_HEADER: &str = "x-auth-version";
/// Default protocol version.
pub const DEFAULT_PROTOCOL_VERSION: &str = "1";

mod algorithm;
pub use algorithm::*;

mod credentials;
pub use credentials::*;

/// Formatting and parsing of the timestamp header.
pub mod timestamp;

mod canonicalize;
pub use canonicalize::*;

mod signing;
pub use signing::*;

mod verifying;
pub use verifying::*;

/// Module containg a mock request type which implements both
/// `ClientRequestLike` and `ServerRequestLike` for testing.
pub mod mock_request;

#[cfg(feature = "reqwest")]
mod reqwest_impls;
