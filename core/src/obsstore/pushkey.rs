//! Base85 encode/decode and the chunked pushkey wire format for marker
//! exchange (spec.md §6, "Pushkey wire format").
//!
//! Base85 isn't worth pulling in a dependency for: it's ~40 lines and this
//! crate is both the only encoder and the only decoder of its own wire
//! format, so round-trip correctness (not byte-for-byte compatibility with
//! any other implementation) is what matters.

use crate::error::{CResult, Error};
use crate::obsstore::framing::{self, VERSION_V0};
use crate::obsstore::marker::Marker;
use std::collections::BTreeMap;

const ALPHABET: &[u8; 85] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz!#$%&()*+-;<=>?@^_`{|}~";

/// Maximum payload per pushkey value, chosen to fit under an 8K HTTP-header
/// style limit once the version header and base85 expansion are accounted
/// for (spec.md §6).
const MAX_PAYLOAD: usize = 5300;

fn decode_table() -> [i8; 256] {
    let mut table = [-1i8; 256];
    for (i, &c) in ALPHABET.iter().enumerate() {
        table[c as usize] = i as i8;
    }
    table
}

pub fn b85encode(data: &[u8]) -> String {
    let padding = (4 - data.len() % 4) % 4;
    let mut padded = data.to_vec();
    padded.resize(data.len() + padding, 0);

    let mut out = String::with_capacity(padded.len() / 4 * 5);
    for word in padded.chunks_exact(4) {
        let mut value = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
        let mut digits = [0u8; 5];
        for slot in digits.iter_mut().rev() {
            *slot = ALPHABET[(value % 85) as usize];
            value /= 85;
        }
        out.push_str(std::str::from_utf8(&digits).unwrap());
    }
    if padding > 0 {
        let new_len = out.len() - padding;
        out.truncate(new_len);
    }
    out
}

pub fn b85decode(text: &str) -> CResult<Vec<u8>> {
    let table = decode_table();
    let bytes = text.as_bytes();
    let padding = (5 - bytes.len() % 5) % 5;
    let mut padded = bytes.to_vec();
    padded.resize(bytes.len() + padding, b'~');

    let mut out = Vec::with_capacity(padded.len() / 5 * 4);
    for chunk in padded.chunks_exact(5) {
        let mut acc: u64 = 0;
        for &c in chunk {
            let digit = table[c as usize];
            if digit < 0 {
                return Err(Error::Corrupt(format!("invalid base85 byte {:?}", c as char)));
            }
            acc = acc * 85 + digit as u64;
        }
        if acc > u32::MAX as u64 {
            return Err(Error::Corrupt("base85 overflow".into()));
        }
        out.extend_from_slice(&(acc as u32).to_be_bytes());
    }
    if padding > 0 {
        let new_len = out.len() - padding;
        out.truncate(new_len);
    }
    Ok(out)
}

/// Encodes `markers` (newest-affecting-marker-last within the caller's
/// ordering) into a `{"dump0": ..., "dump1": ..., ...}` map suitable for
/// pushkey exchange: v0-framed, base85-encoded, chunked to `MAX_PAYLOAD`
/// bytes, with chunks emitted in reverse order so `dump0` is the most
/// recently filled part.
pub fn encode_for_exchange(markers: &[Marker]) -> CResult<BTreeMap<String, String>> {
    let mut parts: Vec<Vec<u8>> = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    // Force a new part on the first marker, mirroring the original's
    // "currentlen = _maxpayload * 2" trick.
    let mut current_len = MAX_PAYLOAD * 2;

    for marker in markers {
        let next = framing::encode_v0(marker)?;
        if next.len() + current_len > MAX_PAYLOAD {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += next.len();
        current.extend_from_slice(&next);
    }
    parts.push(current);
    // The first part we built (index 0) is actually the oldest-filled one
    // doesn't matter: we always drop the empty leading part created by the
    // loop's bootstrap case below.
    parts.retain(|p| !p.is_empty());

    let mut keys = BTreeMap::new();
    for (idx, part) in parts.into_iter().rev().enumerate() {
        let mut data = vec![VERSION_V0];
        data.extend(part);
        keys.insert(format!("dump{}", idx), b85encode(&data));
    }
    Ok(keys)
}

/// Inverts `encode_for_exchange`: concatenates `dump0`, `dump1`, … in
/// reverse (so `dump0`, being newest, is appended last) and decodes the
/// resulting v0 stream.
pub fn decode_from_exchange(dumps: &BTreeMap<String, String>) -> CResult<Vec<Marker>> {
    let mut indices: Vec<usize> = Vec::new();
    for key in dumps.keys() {
        let idx: usize = key
            .strip_prefix("dump")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Corrupt(format!("unexpected pushkey key {:?}", key)))?;
        indices.push(idx);
    }
    indices.sort_unstable();
    indices.reverse();

    let mut markers = Vec::new();
    for idx in indices {
        let key = format!("dump{}", idx);
        let encoded = dumps.get(&key).expect("index collected from this map");
        let data = b85decode(encoded)?;
        if data.is_empty() {
            continue;
        }
        if data[0] != VERSION_V0 {
            return Err(Error::Corrupt(format!("unexpected pushkey marker version {}", data[0])));
        }
        markers.extend(framing::decode_v0_stream(&data[1..])?);
    }
    Ok(markers)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::Node;

    #[test]
    fn base85_round_trips_arbitrary_bytes() {
        for data in [&b""[..], b"a", b"ab", b"abc", b"abcd", b"abcde", b"hello, world!"] {
            let encoded = b85encode(data);
            let decoded = b85decode(&encoded).unwrap();
            assert_eq!(decoded, data, "round trip failed for {:?}", data);
        }
    }

    fn node(byte: u8) -> Node {
        Node::from_bytes(&[byte; 20]).unwrap()
    }

    #[test]
    fn pushkey_round_trips_through_reverse_chunking() {
        let markers = vec![
            Marker {
                precursor: node(1),
                successors: vec![node(2)],
                flags: 0,
                metadata: vec![],
                date: (1.0, 0),
                parents: None,
            },
            Marker {
                precursor: node(3),
                successors: vec![],
                flags: 0,
                metadata: vec![("user".to_string(), "u".to_string())],
                date: (2.0, 0),
                parents: Some(vec![node(9)]),
            },
        ];
        let dumps = encode_for_exchange(&markers).unwrap();
        assert!(dumps.contains_key("dump0"));
        let decoded = decode_from_exchange(&dumps).unwrap();
        assert_eq!(decoded, markers);
    }
}
