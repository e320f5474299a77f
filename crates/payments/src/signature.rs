//! Webhook authenticity: `x-signature: ts=<ts>,v1=<hex hmac>` over the
//! manifest `id:<data id>;request-id:<request id>;ts:<ts>;`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const DIGEST_HEX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,

    #[error("malformed signature header: {0}")]
    Malformed(String),

    #[error("missing notification data id")]
    MissingDataId,

    #[error("invalid signing key")]
    InvalidKey,

    #[error("signature mismatch")]
    Mismatch,
}

/// Parsed `x-signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub ts: String,
    pub v1: String,
}

impl core::str::FromStr for SignatureHeader {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ts = None;
        let mut v1 = None;
        for part in s.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.trim() {
                "ts" => ts = Some(value.trim().to_string()),
                "v1" => v1 = Some(value.trim().to_string()),
                _ => {}
            }
        }

        match (ts, v1) {
            (Some(ts), Some(v1)) if !ts.is_empty() && !v1.is_empty() => Ok(Self { ts, v1 }),
            _ => Err(SignatureError::Malformed("expected ts=...,v1=...".to_string())),
        }
    }
}

pub fn manifest(data_id: &str, request_id: &str, ts: &str) -> String {
    format!("id:{data_id};request-id:{request_id};ts:{ts};")
}

fn keyed(secret: &str) -> Result<HmacSha256, SignatureError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)
}

/// Lowercase hex HMAC-SHA256 of `message`.
pub fn sign(secret: &str, message: &str) -> Result<String, SignatureError> {
    let mut mac = keyed(secret)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a notification against the configured secret.
///
/// `v1` must be exactly the lowercase hex digest; the digest comparison
/// itself is constant-time.
pub fn verify(
    secret: &str,
    header: Option<&str>,
    request_id: &str,
    data_id: Option<&str>,
) -> Result<(), SignatureError> {
    let header: SignatureHeader = header
        .filter(|h| !h.trim().is_empty())
        .ok_or(SignatureError::MissingHeader)?
        .parse()?;
    let data_id = data_id
        .filter(|d| !d.is_empty())
        .ok_or(SignatureError::MissingDataId)?;

    let canonical = header.v1.len() == DIGEST_HEX_LEN
        && header
            .v1
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !canonical {
        return Err(SignatureError::Mismatch);
    }
    let provided = hex::decode(&header.v1).map_err(|_| SignatureError::Mismatch)?;

    let mut mac = keyed(secret)?;
    mac.update(manifest(data_id, request_id, &header.ts).as_bytes());
    mac.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SECRET: &str = "whsec_test";

    fn header_for(data_id: &str, request_id: &str, ts: &str) -> String {
        let v1 = sign(SECRET, &manifest(data_id, request_id, ts)).unwrap();
        format!("ts={ts},v1={v1}")
    }

    #[test]
    fn manifest_layout() {
        assert_eq!(
            manifest("123", "req-9", "1700000000"),
            "id:123;request-id:req-9;ts:1700000000;"
        );
    }

    #[test]
    fn known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        assert_eq!(
            sign("key", "The quick brown fox jumps over the lazy dog").unwrap(),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn accepts_the_exact_signature() {
        let header = header_for("123", "req-1", "1700000000");
        assert_eq!(verify(SECRET, Some(&header), "req-1", Some("123")), Ok(()));
    }

    #[test]
    fn header_parsing_tolerates_spacing_and_extra_keys() {
        let parsed: SignatureHeader = " ts = 17 , v1 = abc ,v2=zzz".parse().unwrap();
        assert_eq!(parsed.ts, "17");
        assert_eq!(parsed.v1, "abc");
        assert!("v1=abc".parse::<SignatureHeader>().is_err());
    }

    #[test]
    fn rejects_missing_parts() {
        assert_eq!(verify(SECRET, None, "r", Some("1")), Err(SignatureError::MissingHeader));
        let header = header_for("1", "r", "5");
        assert_eq!(verify(SECRET, Some(&header), "r", None), Err(SignatureError::MissingDataId));
    }

    #[test]
    fn rejects_wrong_secret_and_other_request() {
        let header = header_for("123", "req-1", "1700000000");
        assert_eq!(
            verify("other", Some(&header), "req-1", Some("123")),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify(SECRET, Some(&header), "req-2", Some("123")),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_uppercased_digest() {
        let ts = "1700000000";
        let v1 = sign(SECRET, &manifest("1", "r", ts)).unwrap().to_uppercase();
        let header = format!("ts={ts},v1={v1}");
        assert_eq!(verify(SECRET, Some(&header), "r", Some("1")), Err(SignatureError::Mismatch));
    }

    proptest! {
        #[test]
        fn any_single_character_mutation_is_rejected(
            pos in 0usize..DIGEST_HEX_LEN,
            replacement in proptest::char::range('!', '~'),
        ) {
            let ts = "1700000000";
            let good = sign(SECRET, &manifest("42", "req", ts)).unwrap();
            let mut chars: Vec<char> = good.chars().collect();
            prop_assume!(chars[pos] != replacement);
            chars[pos] = replacement;
            let mutated: String = chars.into_iter().collect();

            let header = format!("ts={ts},v1={mutated}");
            prop_assert!(verify(SECRET, Some(&header), "req", Some("42")).is_err());
        }
    }
}
