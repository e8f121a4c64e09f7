//! AK/SK request signing (`SDK-HMAC-SHA256`)
//!
//! The signature covers the method, the canonical URI (every segment escaped,
//! always ending with `/`), the sorted query string, every header present at
//! signing time and the SHA-256 of the body.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use reqwest::header::{HeaderName, HeaderValue};
use sha2::{Digest, Sha256};

pub const ALGORITHM: &str = "SDK-HMAC-SHA256";
const DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("request URL has no host")]
    MissingHost,
    #[error("invalid secret key")]
    InvalidKey,
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

/// Signs requests with an access key / secret key pair
#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

impl Signer {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Add `Host`, `X-Sdk-Date` and `Authorization` to the request
    pub fn sign(&self, request: &mut reqwest::Request, now: DateTime<Utc>) -> Result<(), SignError> {
        let host = request_host(request.url()).ok_or(SignError::MissingHost)?;
        let headers = request.headers_mut();
        headers.insert(reqwest::header::HOST, HeaderValue::from_str(&host)?);
        headers.insert(
            HeaderName::from_static("x-sdk-date"),
            HeaderValue::from_str(&now.format(DATE_FORMAT).to_string())?,
        );

        let body: &[u8] = request
            .body()
            .and_then(|b| b.as_bytes())
            .unwrap_or_default();
        let signed_headers = signed_header_names(request.headers());
        let canonical = canonical_request(
            request.method().as_str(),
            request.url(),
            request.headers(),
            &signed_headers,
            body,
        );
        let string_to_sign = string_to_sign(&canonical, now);
        let signature = self.signature(&string_to_sign)?;

        let authorization = format!(
            "{} Access={}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            self.access_key,
            signed_headers.join(";"),
            signature
        );
        request.headers_mut().insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&authorization)?,
        );
        Ok(())
    }

    fn signature(&self, string_to_sign: &str) -> Result<String, SignError> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|_| SignError::InvalidKey)?;
        mac.update(string_to_sign.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

fn request_host(url: &url::Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Lowercase names of every header, sorted
fn signed_header_names(headers: &reqwest::header::HeaderMap) -> Vec<String> {
    let mut names: Vec<String> = headers.keys().map(|k| k.as_str().to_lowercase()).collect();
    names.sort();
    names.dedup();
    names
}

pub(crate) fn canonical_request(
    method: &str,
    url: &url::Url,
    headers: &reqwest::header::HeaderMap,
    signed_headers: &[String],
    body: &[u8],
) -> String {
    let canonical_headers: String = signed_headers
        .iter()
        .map(|name| {
            let value = headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .trim();
            format!("{}:{}\n", name, value)
        })
        .collect();

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        canonical_uri(url),
        canonical_query(url),
        canonical_headers,
        signed_headers.join(";"),
        hex::encode(Sha256::digest(body))
    )
}

fn string_to_sign(canonical_request: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}\n{}\n{}",
        ALGORITHM,
        now.format(DATE_FORMAT),
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    )
}

fn canonical_uri(url: &url::Url) -> String {
    let mut uri: String = url
        .path()
        .split('/')
        .map(|segment| escape(&unescape(segment)))
        .collect::<Vec<_>>()
        .join("/");
    if !uri.ends_with('/') {
        uri.push('/');
    }
    uri
}

fn canonical_query(url: &url::Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (escape(&k), escape(&v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986: only unreserved characters stay as-is
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

fn escape(s: &str) -> String {
    utf8_percent_encode(s, UNRESERVED).to_string()
}

fn unescape(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn canonical_uri_always_ends_with_slash() {
        let url = url::Url::parse("https://cce.cn-north-4.myhuaweicloud.com/api/v3/projects/p1/clusters").unwrap();
        assert_eq!(canonical_uri(&url), "/api/v3/projects/p1/clusters/");

        let url = url::Url::parse("https://aom.example.com/v1/applications/a%20b").unwrap();
        assert_eq!(canonical_uri(&url), "/v1/applications/a%20b/");
    }

    #[test]
    fn canonical_query_is_sorted_and_escaped() {
        let url = url::Url::parse("https://x.example.com/v3?tracker_name=system&a=b c").unwrap();
        assert_eq!(canonical_query(&url), "a=b%20c&tracker_name=system");
    }

    #[test]
    fn escape_keeps_only_unreserved_characters() {
        assert_eq!(escape("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(escape("a/b+c é"), "a%2Fb%2Bc%20%C3%A9");
        assert_eq!(unescape("a%2Fb%2Bc%20%C3%A9"), "a/b+c é");
        assert_eq!(unescape("100%"), "100%");
    }

    #[test]
    fn sign_adds_authorization_headers() {
        let signer = Signer::new("AK", "SK");
        let client = reqwest::Client::new();
        let mut request = client
            .post("https://cts.cn-north-4.myhuaweicloud.com/v3/p1/tracker")
            .header("Content-Type", "application/json")
            .header("X-Project-Id", "p1")
            .body(r#"{"tracker_type":"system"}"#)
            .build()
            .unwrap();

        signer.sign(&mut request, fixed_time()).unwrap();

        let headers = request.headers();
        assert_eq!(headers.get("x-sdk-date").unwrap(), "20240102T030405Z");
        assert_eq!(
            headers.get("host").unwrap(),
            "cts.cn-north-4.myhuaweicloud.com"
        );
        let auth = headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with(
            "SDK-HMAC-SHA256 Access=AK, SignedHeaders=content-type;host;x-project-id;x-sdk-date, Signature="
        ));
        let signature = auth.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn signature_is_deterministic() {
        let signer = Signer::new("AK", "SK");
        let client = reqwest::Client::new();
        let build = || {
            let mut request = client
                .get("https://aom.cn-north-4.myhuaweicloud.com/v1/applications/app-1")
                .build()
                .unwrap();
            signer.sign(&mut request, fixed_time()).unwrap();
            request.headers().get("authorization").cloned().unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn debug_hides_secret() {
        let signer = Signer::new("AK", "very-secret");
        assert!(!format!("{:?}", signer).contains("very-secret"));
    }
}
