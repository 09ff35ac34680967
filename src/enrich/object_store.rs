//! S3-compatible object upload signed with AWS SigV4.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::ObjectStore;
use crate::config;

type HmacSha256 = Hmac<Sha256>;

/// Error markers an overwrite-protected bucket returns for an existing key.
const ALREADY_EXISTS: [&str; 2] = ["FileImmutable", "ObjectAlreadyExists"];

pub struct S3ObjectStore {
    http: reqwest::Client,
    endpoint: Url,
    region: String,
    access_key_id: String,
    secret_access_key: String,
}

/// A signed request, ready to send.
#[derive(Debug, Clone)]
pub struct SignedPut {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl S3ObjectStore {
    pub fn from_config(cfg: &config::ObjectStore) -> Result<Self> {
        let endpoint = Url::parse(&cfg.resolved_endpoint())
            .with_context(|| format!("invalid object store endpoint {}", cfg.resolved_endpoint()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            region: cfg.region.clone(),
            access_key_id: cfg.access_key_id.clone(),
            secret_access_key: cfg.access_key_secret.clone(),
        })
    }

    /// Public retrieval URL for `key`.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}{}", origin_of(&self.endpoint), object_path(&self.endpoint, key))
    }

    pub fn sign_put(
        &self,
        key: &str,
        content_type: &str,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> SignedPut {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let host = host_of(&self.endpoint);
        let canonical_uri = object_path(&self.endpoint, key);

        let mut headers = vec![
            ("content-type".to_string(), content_type.to_string()),
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}\n"))
            .collect();
        let canonical_request = format!(
            "PUT\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );

        let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key =
            derive_signing_key(&self.secret_access_key, &date_stamp, &self.region, "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        headers.retain(|(k, _)| k != "host");
        headers.push((
            "authorization".to_string(),
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
                self.access_key_id
            ),
        ));
        SignedPut {
            url: self.public_url(key),
            headers,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(&self, path: &Path) -> Result<String> {
        let key = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("invalid snapshot file name: {}", path.display()))?;
        let body = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let signed = self.sign_put(key, content_type_for(key), &hex_sha256(&body), Utc::now());
        let mut req = self
            .http
            .put(&signed.url)
            .header("x-oss-forbid-overwrite", "true")
            .header("If-None-Match", "*");
        for (k, v) in &signed.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let resp = req
            .body(body)
            .send()
            .await
            .with_context(|| format!("PUT {} failed", signed.url))?;
        let status = resp.status();
        if status.is_success() {
            info!(key, url = %signed.url, "snapshot uploaded");
            return Ok(signed.url);
        }
        let text = resp.text().await.unwrap_or_default();
        if is_already_exists(status.as_u16(), &text) {
            warn!(key, %status, "object already exists; reusing its URL");
            return Ok(signed.url);
        }
        bail!("object store PUT failed (HTTP {status}) for {key}: {text}");
    }
}

pub fn is_already_exists(status: u16, body: &str) -> bool {
    status == 409 || status == 412 || ALREADY_EXISTS.iter().any(|m| body.contains(m))
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next().map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

fn origin_of(url: &Url) -> String {
    format!("{}://{}", url.scheme(), host_of(url))
}

fn host_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Endpoint path prefix (for path-style endpoints) plus the encoded key.
fn object_path(endpoint: &Url, key: &str) -> String {
    let prefix = endpoint.path().trim_end_matches('/');
    let encoded = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
    format!("{prefix}/{encoded}")
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// kSigning = HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything but `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
