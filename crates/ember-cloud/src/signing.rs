//! Shared Key request signing for the Blob service.
//!
//! The string-to-sign layout follows the 2015-02-21+ rules, where a zero
//! `Content-Length` is signed as an empty line.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The parts of a request that participate in the signature.
#[derive(Debug, Clone, Default)]
pub struct SignableRequest<'a> {
    pub verb: &'a str,
    /// Percent-encoded URL path, starting with `/`.
    pub path: &'a str,
    /// Decoded query parameters.
    pub query: &'a [(String, String)],
    /// `x-ms-*` headers.
    pub ms_headers: &'a [(String, String)],
    pub content_length: u64,
    pub content_type: Option<&'a str>,
    pub if_none_match: Option<&'a str>,
}

impl SignableRequest<'_> {
    #[must_use]
    pub fn string_to_sign(&self, account: &str) -> String {
        let content_length =
            if self.content_length == 0 { String::new() } else { self.content_length.to_string() };

        let mut out = String::new();
        for line in [
            self.verb,
            "", // Content-Encoding
            "", // Content-Language
            content_length.as_str(),
            "", // Content-MD5
            self.content_type.unwrap_or(""),
            "", // Date (x-ms-date is used instead)
            "", // If-Modified-Since
            "", // If-Match
            self.if_none_match.unwrap_or(""),
            "", // If-Unmodified-Since
            "", // Range
        ] {
            out.push_str(line);
            out.push('\n');
        }

        let mut headers: Vec<(String, &str)> = self
            .ms_headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
            .collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in headers {
            out.push_str(&name);
            out.push(':');
            out.push_str(value);
            out.push('\n');
        }

        out.push('/');
        out.push_str(account);
        out.push_str(self.path);

        let mut params: Vec<(String, &str)> =
            self.query.iter().map(|(k, v)| (k.to_ascii_lowercase(), v.as_str())).collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in params {
            out.push('\n');
            out.push_str(&name);
            out.push(':');
            out.push_str(value);
        }

        out
    }
}

/// Base64 HMAC-SHA256 of `string_to_sign` under the decoded account key.
#[must_use]
pub fn sign(key: &[u8], string_to_sign: &str) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(string_to_sign.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// `Authorization` header value for a signed request.
#[must_use]
pub fn authorization_header(account: &str, key: &[u8], string_to_sign: &str) -> String {
    format!("SharedKey {account}:{}", sign(key, string_to_sign))
}
