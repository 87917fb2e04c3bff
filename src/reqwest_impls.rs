use http::header::{HeaderName, HeaderValue};
use http::Method;
use url::Url;

use super::*;

impl ClientRequestLike for reqwest::Request {
    fn method(&self) -> &Method {
        reqwest::Request::method(self)
    }
    fn url(&self) -> &Url {
        reqwest::Request::url(self)
    }
    fn set_url(&mut self, url: Url) {
        *self.url_mut() = url;
    }
    fn body(&mut self) -> RequestBody<'_> {
        match reqwest::Request::body(self) {
            None => RequestBody::Empty,
            Some(body) => body
                .as_bytes()
                .map_or(RequestBody::Unbuffered, RequestBody::Bytes),
        }
    }
    fn append_header(&mut self, header: HeaderName, value: HeaderValue) {
        self.headers_mut().append(header, value);
    }
}

impl ClientRequestLike for reqwest::blocking::Request {
    fn method(&self) -> &Method {
        reqwest::blocking::Request::method(self)
    }
    fn url(&self) -> &Url {
        reqwest::blocking::Request::url(self)
    }
    fn set_url(&mut self, url: Url) {
        *self.url_mut() = url;
    }
    // Blocking bodies backed by a reader are read into memory here.
    fn body(&mut self) -> RequestBody<'_> {
        match self.body_mut() {
            None => RequestBody::Empty,
            Some(body) => match body.buffer() {
                Ok(bytes) => RequestBody::Bytes(bytes),
                Err(_) => RequestBody::Unbuffered,
            },
        }
    }
    fn append_header(&mut self, header: HeaderName, value: HeaderValue) {
        self.headers_mut().append(header, value);
    }
}
