use std::error::Error;
use std::io::{self, Write};
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use http_hmac::mock_request::MockRequest;
use http_hmac::{
    timestamp, CanonicalMessage, Credentials, RequestSigner, SignerConfig, SigningExt,
    SimpleKeyProvider, VerifyingConfig, VerifyingExt,
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
enum Mode {
    /// Print the canonical message for the request as received.
    Canonicalize,
    /// Sign the request and print it.
    Sign,
    /// Check the signature of the request.
    Verify,
}

#[derive(Debug, StructOpt)]
#[structopt(about = "Signs and verifies HTTP requests read from stdin.")]
struct Opt {
    #[structopt(subcommand)]
    mode: Mode,

    /// The API key added to the query.
    #[structopt(short, long, env = "HMAC_API_KEY", global = true)]
    api_key: Option<String>,

    /// The secret used to key HMAC-SHA256.
    #[structopt(short, long, env = "HMAC_SECRET_KEY", hide_env_values = true, global = true)]
    secret_key: Option<String>,

    /// Signing time, or the current time when verifying, as yyyy-MM-ddTHH:mm:ssZ.
    #[structopt(short, long, parse(try_from_str = parse_timestamp), global = true)]
    timestamp: Option<DateTime<Utc>>,

    /// Substitute `_` and `-` for `/` and `+` in the signature.
    #[structopt(short, long, global = true)]
    url_safe: bool,

    /// Leave the request body out of the signature.
    #[structopt(short, long, global = true)]
    exclude_body: bool,

    /// Allowed clock skew when verifying, in seconds.
    #[structopt(short, long, default_value = "300", global = true)]
    leeway_secs: u64,
}

fn parse_timestamp(value: &str) -> anyhow::Result<DateTime<Utc>> {
    timestamp::parse_timestamp(value).ok_or_else(|| anyhow!("Invalid timestamp: {:?}", value))
}

impl Opt {
    fn wire_config(&self) -> SignerConfig {
        SignerConfig::new()
            .with_url_safe_base64(self.url_safe)
            .with_sign_body(!self.exclude_body)
    }
    fn credentials(&self) -> anyhow::Result<Credentials> {
        let api_key = self.api_key.as_deref().context("No API key provided")?;
        let secret_key = self.secret_key.as_deref().context("No secret key provided")?;
        Ok(Credentials::new(api_key, secret_key))
    }
    fn signer(&self) -> anyhow::Result<RequestSigner> {
        Ok(RequestSigner::new(self.credentials()?, self.wire_config()))
    }
    fn verification_config(&self) -> anyhow::Result<VerifyingConfig> {
        let key_provider = SimpleKeyProvider::new(vec![self.credentials()?]);
        Ok(VerifyingConfig::new(key_provider)
            .with_wire(self.wire_config())
            .with_timestamp_leeway(Duration::from_secs(self.leeway_secs)))
    }
    fn canonicalize(&self, req: &MockRequest) -> anyhow::Result<Vec<u8>> {
        let config = self.wire_config();
        // The verifier checks the most recent timestamp
        let latest = req.headers().get_all(config.timestamp_header()).iter().last();
        let timestamp = match latest {
            Some(value) => value.to_str()?.to_owned(),
            None => timestamp::format_timestamp(self.timestamp.unwrap_or_else(Utc::now)),
        };
        let body = if config.sign_body() { req.body() } else { None };
        let message = CanonicalMessage::new(&req.method(), &timestamp, req.url(), body)?;
        Ok(message.to_bytes())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let opt = Opt::from_args();

    let mut req = MockRequest::from_reader(&mut io::stdin().lock())?;

    log::info!("{:?}", req);

    match opt.mode {
        Mode::Canonicalize => {
            let res = opt.canonicalize(&req)?;
            io::stdout().lock().write_all(&res)?;
        }
        Mode::Sign => {
            let signer = opt.signer()?;
            match opt.timestamp {
                Some(instant) => req.sign_at(&signer, instant)?,
                None => req.sign(&signer)?,
            }
            req.write(&mut io::stdout().lock())?;
        }
        Mode::Verify => {
            let config = opt.verification_config()?;
            match opt.timestamp {
                Some(now) => req.verify_at(&config, now)?,
                None => req.verify(&config)?,
            }
            log::info!("Signature verified");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNED_TWICE: &str = "GET /api/entries?apiKey=a&apiKey=a HTTP/1.1\n\
        Host: example.com\n\
        X-Auth-Timestamp: 2016-04-02T22:02:59Z\n\
        X-Auth-Timestamp: 2016-04-02T22:03:00Z\n";

    #[test]
    fn canonicalize_uses_latest_timestamp() {
        let opt = Opt::from_iter(&["http-hmac-validator", "canonicalize"]);
        let req = MockRequest::from_reader(&mut SIGNED_TWICE.as_bytes()).unwrap();

        assert_eq!(
            opt.canonicalize(&req).unwrap(),
            b"GET\n2016-04-02T22:03:00Z\n/api/entries?apiKey=a&apiKey=a".to_vec()
        );
    }

    #[test]
    fn canonicalize_rejects_malformed_escapes() {
        let opt = Opt::from_iter(&["http-hmac-validator", "canonicalize"]);
        let req = MockRequest::from_reader(&mut "GET /x?q=% HTTP/1.1\n".as_bytes()).unwrap();

        assert!(opt.canonicalize(&req).is_err());
    }
}
