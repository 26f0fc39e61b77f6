//! HTTP plumbing for one punch cycle: a fixed browser-like header set, a
//! pair of reqwest clients (redirect-following and redirect-suppressing)
//! sharing one [`SessionJar`], and explicit response-body decoding.
//!
//! Decompression is deliberately not delegated to reqwest: the engine
//! advertises `Accept-Encoding: gzip` itself and inflates the body before
//! scraping, so an encoding it cannot handle is a hard error instead of a
//! silently garbled stream.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONNECTION, CONTENT_ENCODING,
    USER_AGENT,
};
use reqwest::{Client, Response};
use serde::Deserialize;

use crate::cookies::SessionJar;
use crate::duration::deserialize_duration;
use crate::error::PunchError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Allow insecure TLS; some campus portals run with broken chains.
    pub accept_invalid_certs: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/90.0.4430.93 Safari/537.36"
                .to_string(),
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,\
                     image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9"
                .to_string(),
            accept_language: "zh-CN,zh;q=0.9".to_string(),
            timeout: Duration::from_secs(10),
            accept_invalid_certs: false,
        }
    }
}

/// The header set applied to every request of a cycle.
pub fn browser_headers(cfg: &HttpConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&cfg.accept) {
        headers.insert(ACCEPT, value);
    }
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
    if let Ok(value) = HeaderValue::from_str(&cfg.accept_language) {
        headers.insert(ACCEPT_LANGUAGE, value);
    }
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Ok(value) = HeaderValue::from_str(&cfg.user_agent) {
        headers.insert(USER_AGENT, value);
    }
    headers
}

/// Paired clients over one cookie jar. `http` follows redirects for the
/// scraping GETs; `no_redirect` stops at the first redirect so the login
/// POST can treat a 302 as its success signal.
pub struct SessionClient {
    http: Client,
    no_redirect: Client,
    jar: Arc<SessionJar>,
}

impl SessionClient {
    pub fn new(cfg: &HttpConfig) -> Result<Self, PunchError> {
        let jar = Arc::new(SessionJar::new());
        let headers = browser_headers(cfg);
        let builder = || {
            Client::builder()
                .default_headers(headers.clone())
                .timeout(cfg.timeout)
                .danger_accept_invalid_certs(cfg.accept_invalid_certs)
                .cookie_provider(Arc::clone(&jar))
        };
        let http = builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        let no_redirect = builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { http, no_redirect, jar })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn no_redirect(&self) -> &Client {
        &self.no_redirect
    }

    pub fn jar(&self) -> &SessionJar {
        &self.jar
    }
}

/// Decode a response body according to its `Content-Encoding`.
pub fn decode_body(content_encoding: Option<&str>, body: &[u8]) -> Result<Vec<u8>, PunchError> {
    match content_encoding.unwrap_or("") {
        "" | "identity" => Ok(body.to_vec()),
        "gzip" => {
            let mut decoded = Vec::new();
            GzDecoder::new(body).read_to_end(&mut decoded)?;
            Ok(decoded)
        }
        other => Err(PunchError::UnsupportedEncoding(other.to_string())),
    }
}

/// Collect and decode a response body.
pub async fn read_body(res: Response) -> Result<Vec<u8>, PunchError> {
    let encoding = res
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let raw = res.bytes().await?;
    decode_body(encoding.as_deref(), &raw)
}
