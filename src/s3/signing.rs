//! AWS Signature Version 4
//!
//! <https://docs.aws.amazon.com/AmazonS3/latest/API/sig-v4-header-based-auth.html>

use super::credentials::Credentials;
use super::S3ClientError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// Everything but the unreserved characters `A-Z a-z 0-9 - . _ ~`
const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Same as the query set, but keeps `/` between path segments
const PATH_ENCODE: &AsciiSet = &QUERY_ENCODE.remove(b'/');

/// SHA-256 of an empty payload
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// URI-encode an object path, keeping `/`
pub fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_ENCODE).to_string()
}

/// Canonical query string: names and values encoded, then sorted
pub fn canonical_query_string(query: &[(&str, &str)]) -> String {
    let mut pairs: Vec<String> = query
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, QUERY_ENCODE),
                utf8_percent_encode(value, QUERY_ENCODE)
            )
        })
        .collect();
    pairs.sort();
    pairs.join("&")
}

/// Hex SHA-256 of a request payload
pub fn payload_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// A request ready to be signed
///
/// Header names must be lowercase. Every header in the map is signed.
#[derive(Debug)]
pub struct SigningRequest<'a> {
    pub method: &'a str,
    /// Already URI-encoded absolute path
    pub canonical_uri: &'a str,
    pub canonical_query: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    pub payload_hash: &'a str,
}

/// Sign a request and return the `Authorization` header value
pub fn authorization(
    credentials: &Credentials,
    region: &str,
    datetime: &DateTime<Utc>,
    request: &SigningRequest<'_>,
) -> Result<String, S3ClientError> {
    let date = datetime.format("%Y%m%d").to_string();
    let timestamp = datetime.format("%Y%m%dT%H%M%SZ").to_string();

    let signed_headers = signed_headers(request.headers);
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.canonical_uri,
        request.canonical_query,
        canonical_headers(request.headers),
        signed_headers,
        request.payload_hash
    );

    let scope = format!("{}/{}/s3/aws4_request", date, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        timestamp,
        scope,
        payload_hash(canonical_request.as_bytes())
    );

    let key = signing_key(credentials.secret_access_key(), &date, region)?;
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

    Ok(format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id(),
        scope,
        signed_headers,
        signature
    ))
}

fn canonical_headers(headers: &BTreeMap<String, String>) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect()
}

fn signed_headers(headers: &BTreeMap<String, String>) -> String {
    headers.keys().map(String::as_str).collect::<Vec<_>>().join(";")
}

fn signing_key(secret: &str, date: &str, region: &str) -> Result<Vec<u8>, S3ClientError> {
    let date_key = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let region_key = hmac(&date_key, region.as_bytes())?;
    let service_key = hmac(&region_key, b"s3")?;
    hmac(&service_key, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, S3ClientError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| S3ClientError::SigningError(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
