//! Signing and header helpers shared by the provider verifiers and the
//! outgoing signer. Everything here is pure.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Request headers as captured at receipt.
pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacEncoding {
    Hex,
    Base64,
}

/// Constant-time equality. Empty inputs never match and a length mismatch is
/// rejected up front; otherwise every byte is folded into the result.
pub fn secure_compare(a: &[u8], b: &[u8]) -> bool {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// HMAC-SHA256 of `data` keyed by `secret`.
///
/// Returns an empty string only if the MAC cannot be keyed, which
/// [`secure_compare`] never treats as a match.
pub fn generate_hmac(secret: &[u8], data: &[u8], encoding: HmacEncoding) -> String {
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret) else {
        return String::new();
    };
    mac.update(data);
    let digest = mac.finalize().into_bytes();

    match encoding {
        HmacEncoding::Hex => hex::encode(digest),
        HmacEncoding::Base64 => STANDARD.encode(digest),
    }
}

/// Looks up the first non-empty value among `candidates`, trying each name as
/// given, lower-cased, upper-cased and in CGI form (`HTTP_X_FOO`).
pub fn extract_header<'a>(headers: &'a Headers, candidates: &[&str]) -> Option<&'a str> {
    candidates.iter().find_map(|name| {
        header_variants(name)
            .into_iter()
            .filter_map(|variant| headers.get(&variant))
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
    })
}

fn header_variants(name: &str) -> [String; 4] {
    let upper = name.to_ascii_uppercase();
    let cgi = format!("HTTP_{}", upper.replace('-', "_"));
    [name.to_string(), name.to_ascii_lowercase(), upper, cgi]
}

/// Parsed `k=v,k=v` header. Repeated keys keep every value in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvHeader(BTreeMap<String, Vec<String>>);

impl KvHeader {
    pub fn first(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn all(&self, key: &str) -> &[String] {
        self.0.get(key).map_or(&[], Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn parse_kv_header(value: &str) -> KvHeader {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for part in value.split(',') {
        let Some((key, val)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();
        if key.is_empty() {
            continue;
        }
        map.entry(key.to_string()).or_default().push(val.to_string());
    }
    KvHeader(map)
}
