use std::fmt::{self, Debug};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::canonicalize::CanonicalMessage;

/// A keyed signature algorithm applied to a canonical message.
pub trait HttpSignature: Debug + Send + Sync + 'static {
    /// The algorithm name, for diagnostics.
    fn name(&self) -> &str;
    /// Returns the raw (unencoded) signature of the message.
    fn http_sign(&self, message: &CanonicalMessage) -> Vec<u8>;
    /// Returns true if `signature` is the raw signature of the message. The
    /// implementation should be sure to perform any comparisons in constant
    /// time.
    fn http_verify(&self, message: &CanonicalMessage, signature: &[u8]) -> bool {
        self.http_sign(message).ct_eq(signature).into()
    }
}

/// HMAC-SHA256 keyed with the UTF-8 bytes of a secret.
#[derive(Clone)]
pub struct HmacSha256(Hmac<Sha256>);

impl HmacSha256 {
    /// Creates a new instance keyed with the given secret.
    pub fn new(secret: &[u8]) -> Self {
        // HMAC accepts keys of any length, hashing long ones first.
        match Hmac::new_from_slice(secret) {
            Ok(mac) => Self(mac),
            Err(_) => unreachable!("HMAC-SHA256 rejected a {} byte key", secret.len()),
        }
    }
}

impl Debug for HmacSha256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("HmacSha256 { .. }")
    }
}

impl HttpSignature for HmacSha256 {
    fn name(&self) -> &str {
        "hmac-sha256"
    }
    fn http_sign(&self, message: &CanonicalMessage) -> Vec<u8> {
        let mut mac = self.0.clone();
        mac.update(message.head().as_bytes());
        if let Some(body) = message.body() {
            mac.update(CanonicalMessage::DELIMITER.as_bytes());
            mac.update(body);
        }
        mac.finalize().into_bytes().to_vec()
    }
}

/// How the raw signature is turned into a header value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SignatureEncoding {
    /// Standard base64 alphabet with padding.
    Standard,
    /// Standard base64 with `/` replaced by `_` and `+` replaced by `-`
    /// afterwards. Padding is kept, so this is not RFC 4648 base64url.
    UrlSafe,
}

impl Default for SignatureEncoding {
    fn default() -> Self {
        SignatureEncoding::Standard
    }
}

impl SignatureEncoding {
    /// Encodes a raw signature for transport.
    pub fn encode(self, signature: &[u8]) -> String {
        let encoded = base64::encode(signature);
        match self {
            SignatureEncoding::Standard => encoded,
            SignatureEncoding::UrlSafe => encoded.replace('/', "_").replace('+', "-"),
        }
    }

    /// Decodes a transported signature. Returns `None` if it is not valid
    /// in this encoding.
    pub fn decode(self, encoded: &str) -> Option<Vec<u8>> {
        match self {
            SignatureEncoding::Standard => base64::decode(encoded).ok(),
            SignatureEncoding::UrlSafe => {
                if encoded.contains(|c: char| c == '/' || c == '+') {
                    return None;
                }
                base64::decode(encoded.replace('_', "/").replace('-', "+")).ok()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Encodes to "+/+/" in the standard alphabet.
    const AWKWARD: &[u8] = &[0xfb, 0xff, 0xbf];

    #[test]
    fn url_safe_only_substitutes() {
        assert_eq!(SignatureEncoding::Standard.encode(AWKWARD), "+/+/");
        assert_eq!(SignatureEncoding::UrlSafe.encode(AWKWARD), "-_-_");

        // Padding survives the substitution
        assert_eq!(SignatureEncoding::UrlSafe.encode(&[0xfb, 0xff]), "-_8=");
    }

    #[test]
    fn decode_reverses_encode() {
        for encoding in &[SignatureEncoding::Standard, SignatureEncoding::UrlSafe] {
            let encoded = encoding.encode(AWKWARD);
            assert_eq!(encoding.decode(&encoded).as_deref(), Some(AWKWARD));
        }
        assert_eq!(SignatureEncoding::UrlSafe.decode("+/+/"), None);
        assert_eq!(SignatureEncoding::Standard.decode("-_-_"), None);
    }

    #[test]
    fn hmac_accepts_any_key_length() {
        let url = url::Url::parse("http://example.com/a").unwrap();
        let message = CanonicalMessage::new(&http::Method::GET, "t", &url, None).unwrap();

        let empty = HmacSha256::new(b"").http_sign(&message);
        let long = HmacSha256::new(&[0x2a; 200]).http_sign(&message);
        assert_eq!(empty.len(), 32);
        assert_eq!(long.len(), 32);
        assert_ne!(empty, long);
    }

    #[test]
    fn hmac_verifies_own_signature() {
        let url = url::Url::parse("http://example.com/a?b=c").unwrap();
        let message = CanonicalMessage::new(
            &http::Method::GET,
            "2016-02-02T00:09:22Z",
            &url,
            Some(&b"body"[..]),
        )
        .unwrap();
        let key = HmacSha256::new(b"secret");

        let signature = key.http_sign(&message);
        assert_eq!(signature.len(), 32);
        assert!(key.http_verify(&message, &signature));
        assert!(!HmacSha256::new(b"other").http_verify(&message, &signature));
    }
}
