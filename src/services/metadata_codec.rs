//! Reversible encoding of user metadata into header-safe text.
//!
//! Object stores carry user metadata as HTTP headers: ASCII only, and header
//! names are case-folded. Keys therefore keep only `[a-z0-9-]` verbatim and
//! escape every other UTF-8 byte as lowercase `%xx`; values keep the URL
//! unreserved set and percent-encode the rest. Control characters cannot be
//! represented faithfully by every store and are rejected up front.

use std::collections::{BTreeMap, HashMap};

use crate::errors::{GatewayError, GatewayResult};

/// Encode a user-supplied metadata map for a store write.
pub fn encode_metadata(
    metadata: &BTreeMap<String, String>,
) -> GatewayResult<HashMap<String, String>> {
    metadata
        .iter()
        .map(|(key, value)| {
            if key.is_empty() {
                return Err(GatewayError::validation("Metadata keys must not be empty"));
            }
            reject_control("key", key)?;
            reject_control("value", value)?;
            Ok((encode_key(key), urlencoding::encode(value).into_owned()))
        })
        .collect()
}

/// Decode metadata read back from the store. Entries that are not valid
/// escapes (written by other tools) are passed through unchanged.
pub fn decode_metadata(metadata: &HashMap<String, String>) -> BTreeMap<String, String> {
    metadata
        .iter()
        .map(|(key, value)| (decode_lenient(key), decode_lenient(value)))
        .collect()
}

fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02x}")),
        }
    }
    out
}

fn decode_lenient(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

fn reject_control(field: &str, text: &str) -> GatewayResult<()> {
    if text.chars().any(char::is_control) {
        return Err(GatewayError::validation(format!(
            "Metadata {field} contains control characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn header_safe(text: &str) -> bool {
        text.bytes().all(|b| b.is_ascii_graphic())
    }

    #[test]
    fn round_trips_mixed_content() {
        let original = map(&[
            ("Author", "Zoë O'Brien"),
            ("project code", "A/B 100%"),
            ("тег", "значение"),
            ("emoji", "📦 shipped"),
            ("empty", ""),
            ("plain-key", "plain"),
        ]);
        let encoded = encode_metadata(&original).unwrap();
        for (k, v) in &encoded {
            assert!(header_safe(k), "key {k:?}");
            assert!(v.is_empty() || header_safe(v), "value {v:?}");
            assert_eq!(k, &k.to_ascii_lowercase());
        }
        assert_eq!(decode_metadata(&encoded), original);
    }

    #[test]
    fn survives_store_lowercasing_header_names() {
        let original = map(&[("CamelCase", "Value")]);
        let stored: HashMap<String, String> = encode_metadata(&original)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        assert_eq!(decode_metadata(&stored), original);
    }

    #[test]
    fn rejects_control_characters_and_empty_keys() {
        assert!(encode_metadata(&map(&[("a", "line\nbreak")])).is_err());
        assert!(encode_metadata(&map(&[("tab\tkey", "v")])).is_err());
        assert!(encode_metadata(&map(&[("a", "nul\u{0}")])).is_err());
        assert!(encode_metadata(&map(&[("a", "c1\u{85}")])).is_err());
        assert!(encode_metadata(&map(&[("", "v")])).is_err());
    }

    #[test]
    fn foreign_metadata_passes_through() {
        let mut raw = HashMap::new();
        raw.insert("owner".to_string(), "team-a".to_string());
        raw.insert("ratio".to_string(), "100%".to_string());
        let decoded = decode_metadata(&raw);
        assert_eq!(decoded["owner"], "team-a");
        assert_eq!(decoded["ratio"], "100%");
    }

    #[test]
    fn round_trips_generated_maps() {
        let alphabet: Vec<char> = "aZ9 -_.~%/:;=+&?#é漢🙂'\"".chars().collect();
        for seed in 0..200usize {
            let mut original = BTreeMap::new();
            for entry in 0..(seed % 5 + 1) {
                let key: String = (0..(entry % 4 + 1))
                    .map(|i| alphabet[(seed * 7 + entry * 3 + i * 5) % alphabet.len()])
                    .collect();
                let value: String = (0..(seed % 9))
                    .map(|i| alphabet[(seed * 11 + entry + i * 13) % alphabet.len()])
                    .collect();
                original.insert(key, value);
            }
            let encoded = encode_metadata(&original).unwrap();
            assert_eq!(decode_metadata(&encoded), original, "seed {seed}");
        }
    }
}
