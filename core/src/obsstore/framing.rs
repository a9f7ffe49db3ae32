//! The two on-disk binary framings for obsolescence markers.
//!
//! Both versions are big-endian, self-delimiting record streams; a reader
//! that hits a short trailing record (fewer bytes remain than the claimed
//! record needs) stops and returns what it has parsed so far rather than
//! erroring, so a partially-written `obsstore` tail never blocks reading the
//! markers that did make it to disk.

use crate::error::{CResult, Error};
use crate::node::Node;
use crate::obsstore::marker::Marker;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

pub const VERSION_V0: u8 = 0;
pub const VERSION_V1: u8 = 1;

const V0_FIXED_LEN: usize = 1 + 4 + 1 + 20; // numsuc, metasize, flags, precursor
const V1_FIXED_LEN: usize = 8 + 2 + 2 + 1 + 1 + 1; // date, tz, flags, numsuc, numpar, nummeta
const NO_PARENTS_RECORDED: u8 = 3;

/// Encodes one marker in v0 framing. Fails if `USING_SHA256` is set, since
/// v0 has no room to record a node width other than 20 bytes.
pub fn encode_v0(marker: &Marker) -> CResult<Vec<u8>> {
    if marker.using_sha256() {
        return Err(Error::Value("v0 framing cannot carry SHA-256 nodes".into()));
    }
    if marker.precursor.len() != 20 {
        return Err(Error::Value("v0 framing requires 20-byte nodes".into()));
    }

    let mut metadata = marker.metadata.clone();
    metadata.retain(|(k, _)| k != "date" && !is_parent_key(k));
    metadata.push(("date".to_string(), format!("{} {}", marker.date.0, marker.date.1)));
    if let Some(parents) = &marker.parents {
        for (i, p) in parents.iter().enumerate() {
            metadata.push((format!("p{}", i), p.to_hex()));
        }
    }
    metadata.sort_by(|a, b| a.0.cmp(&b.0));

    let meta_bytes = metadata
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("\0")
        .into_bytes();

    let mut out = Vec::new();
    out.write_u8(marker.successors.len() as u8)?;
    out.write_u32::<BigEndian>(meta_bytes.len() as u32)?;
    out.write_u8(marker.flags as u8)?;
    out.write_all(marker.precursor.as_bytes())?;
    for s in &marker.successors {
        out.write_all(s.as_bytes())?;
    }
    out.write_all(&meta_bytes)?;
    Ok(out)
}

fn is_parent_key(key: &str) -> bool {
    key.len() == 2 && key.starts_with('p') && key.as_bytes()[1].is_ascii_digit()
}

/// Decodes every v0 marker found in `data`, stopping at the first
/// incomplete trailing record.
pub fn decode_v0_stream(data: &[u8]) -> CResult<Vec<Marker>> {
    let mut markers = Vec::new();
    let mut off = 0usize;
    while off + V0_FIXED_LEN <= data.len() {
        let numsuc = data[off] as usize;
        let metasize = u32::from_be_bytes(data[off + 1..off + 5].try_into().unwrap()) as usize;
        let flags = data[off + 5] as u32;
        let precursor = Node::from_bytes(&data[off + 6..off + 26])?;
        let mut cursor = off + V0_FIXED_LEN;

        let succ_bytes = numsuc * 20;
        if cursor + succ_bytes + metasize > data.len() {
            break;
        }
        let mut successors = Vec::with_capacity(numsuc);
        for i in 0..numsuc {
            let start = cursor + i * 20;
            successors.push(Node::from_bytes(&data[start..start + 20])?);
        }
        cursor += succ_bytes;

        let meta_raw = std::str::from_utf8(&data[cursor..cursor + metasize])
            .map_err(|e| Error::Corrupt(format!("non-utf8 v0 metadata: {}", e)))?;
        cursor += metasize;

        let mut metadata = Vec::new();
        let mut date = (0.0f64, 0i32);
        let mut parent_pairs: Vec<(usize, Node)> = Vec::new();
        if !meta_raw.is_empty() {
            for pair in meta_raw.split('\0') {
                let (k, v) =
                    pair.split_once(':').ok_or_else(|| Error::Corrupt("bad v0 metadata pair".into()))?;
                if k == "date" {
                    let (secs, tz) = v
                        .split_once(' ')
                        .ok_or_else(|| Error::Corrupt("bad v0 date metadata".into()))?;
                    date = (
                        secs.parse().map_err(|_| Error::Corrupt("bad v0 date seconds".into()))?,
                        tz.parse().map_err(|_| Error::Corrupt("bad v0 date tz".into()))?,
                    );
                } else if is_parent_key(k) {
                    let idx = (k.as_bytes()[1] - b'0') as usize;
                    parent_pairs.push((idx, Node::from_hex(v)?));
                } else {
                    metadata.push((k.to_string(), v.to_string()));
                }
            }
        }
        parent_pairs.sort_by_key(|(i, _)| *i);
        let parents = if parent_pairs.is_empty() {
            None
        } else {
            Some(parent_pairs.into_iter().map(|(_, n)| n).collect())
        };

        let marker = Marker { precursor, successors, flags, metadata, date, parents };
        marker.validate()?;
        markers.push(marker);
        off = cursor;
    }
    Ok(markers)
}

/// Encodes one marker in v1 framing.
pub fn encode_v1(marker: &Marker) -> CResult<Vec<u8>> {
    let nodesize = marker.precursor.len();
    if marker.successors.iter().any(|s| s.len() != nodesize) {
        return Err(Error::Value("mixed node widths in marker".into()));
    }
    let numpar = match &marker.parents {
        None => NO_PARENTS_RECORDED,
        Some(p) if p.len() < NO_PARENTS_RECORDED as usize => p.len() as u8,
        Some(_) => return Err(Error::Value("too many parents for v1 framing".into())),
    };

    let mut metadata = marker.metadata.clone();
    metadata.sort_by(|a, b| a.0.cmp(&b.0));
    for (k, v) in &metadata {
        if k.len() > 255 || v.len() > 255 {
            return Err(Error::Value("v1 metadata key/value exceeds 255 bytes".into()));
        }
    }

    let mut rest = Vec::new();
    rest.write_f64::<BigEndian>(marker.date.0)?;
    rest.write_i16::<BigEndian>((marker.date.1 / 60) as i16)?;
    rest.write_u16::<BigEndian>(marker.flags as u16)?;
    rest.write_u8(marker.successors.len() as u8)?;
    rest.write_u8(numpar)?;
    rest.write_u8(metadata.len() as u8)?;
    rest.write_all(marker.precursor.as_bytes())?;
    for s in &marker.successors {
        rest.write_all(s.as_bytes())?;
    }
    if numpar != NO_PARENTS_RECORDED {
        for p in marker.parents.as_ref().unwrap() {
            rest.write_all(p.as_bytes())?;
        }
    }
    for (k, v) in &metadata {
        rest.write_u8(k.len() as u8)?;
        rest.write_u8(v.len() as u8)?;
    }
    for (k, v) in &metadata {
        rest.write_all(k.as_bytes())?;
        rest.write_all(v.as_bytes())?;
    }

    let mut out = Vec::with_capacity(4 + rest.len());
    out.write_u32::<BigEndian>(rest.len() as u32)?;
    out.write_all(&rest)?;
    Ok(out)
}

/// Decodes every v1 marker found in `data`, stopping at the first
/// incomplete trailing record.
pub fn decode_v1_stream(data: &[u8]) -> CResult<Vec<Marker>> {
    let mut markers = Vec::new();
    let mut off = 0usize;
    while off + 4 <= data.len() {
        let total_size = u32::from_be_bytes(data[off..off + 4].try_into().unwrap()) as usize;
        if off + 4 + total_size > data.len() {
            break;
        }
        let record = &data[off + 4..off + 4 + total_size];
        if record.len() < V1_FIXED_LEN {
            break;
        }

        let mut cursor = Cursor::new(record);
        let date_secs = cursor.read_f64::<BigEndian>()?;
        let tz_minutes = cursor.read_i16::<BigEndian>()?;
        let flags = cursor.read_u16::<BigEndian>()? as u32;
        let numsuc = cursor.read_u8()? as usize;
        let numpar = cursor.read_u8()?;
        let nummeta = cursor.read_u8()? as usize;

        let nodesize = if flags & crate::obsstore::marker::USING_SHA256 != 0 { 32 } else { 20 };

        let mut precursor_buf = vec![0u8; nodesize];
        cursor.read_exact(&mut precursor_buf)?;
        let precursor = Node::from_bytes(&precursor_buf)?;

        let mut successors = Vec::with_capacity(numsuc);
        for _ in 0..numsuc {
            let mut buf = vec![0u8; nodesize];
            cursor.read_exact(&mut buf)?;
            successors.push(Node::from_bytes(&buf)?);
        }

        let parents = if numpar == NO_PARENTS_RECORDED {
            None
        } else {
            let mut parents = Vec::with_capacity(numpar as usize);
            for _ in 0..numpar {
                let mut buf = vec![0u8; nodesize];
                cursor.read_exact(&mut buf)?;
                parents.push(Node::from_bytes(&buf)?);
            }
            Some(parents)
        };

        let mut lens = Vec::with_capacity(nummeta);
        for _ in 0..nummeta {
            let klen = cursor.read_u8()?;
            let vlen = cursor.read_u8()?;
            lens.push((klen, vlen));
        }
        let mut metadata = Vec::with_capacity(nummeta);
        for (klen, vlen) in lens {
            let mut kbuf = vec![0u8; klen as usize];
            cursor.read_exact(&mut kbuf)?;
            let mut vbuf = vec![0u8; vlen as usize];
            cursor.read_exact(&mut vbuf)?;
            metadata.push((String::from_utf8(kbuf)?, String::from_utf8(vbuf)?));
        }

        let marker = Marker {
            precursor,
            successors,
            flags,
            metadata,
            date: (date_secs, tz_minutes as i32 * 60),
            parents,
        };
        marker.validate()?;
        markers.push(marker);
        off += 4 + total_size;
    }
    Ok(markers)
}

/// Reads a version-headered marker stream: one byte selecting the framing,
/// followed by a sequence of records in that framing.
pub fn read_markers(data: &[u8]) -> CResult<Vec<Marker>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    match data[0] {
        VERSION_V0 => decode_v0_stream(&data[1..]),
        VERSION_V1 => decode_v1_stream(&data[1..]),
        other => Err(Error::Corrupt(format!("unknown obsstore version {}", other))),
    }
}

pub fn encode_marker(marker: &Marker, version: u8) -> CResult<Vec<u8>> {
    match version {
        VERSION_V0 => encode_v0(marker),
        VERSION_V1 => encode_v1(marker),
        other => Err(Error::Programming(format!("unknown obsstore version {}", other))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn node(byte: u8) -> Node {
        Node::from_bytes(&[byte; 20]).unwrap()
    }

    #[test]
    fn v0_round_trips_modulo_metadata_order() {
        let marker = Marker {
            precursor: node(1),
            successors: vec![node(2), node(3)],
            flags: 0,
            metadata: vec![("user".to_string(), "u".to_string())],
            date: (1000.0, 0),
            parents: Some(vec![node(9)]),
        };
        let encoded = encode_v0(&marker).unwrap();
        let mut decoded = decode_v0_stream(&encoded).unwrap();
        assert_eq!(decoded.len(), 1);
        let mut got = decoded.remove(0);
        got.sort_metadata();
        let mut want = marker.clone();
        want.sort_metadata();
        assert_eq!(got, want);
    }

    #[test]
    fn v0_rejects_sha256() {
        let marker = Marker {
            precursor: Node::from_bytes(&[1u8; 32]).unwrap(),
            successors: vec![],
            flags: USING_SHA256_FOR_TEST,
            metadata: vec![],
            date: (0.0, 0),
            parents: None,
        };
        assert!(encode_v0(&marker).is_err());
    }
    const USING_SHA256_FOR_TEST: u32 = crate::obsstore::marker::USING_SHA256;

    #[test]
    fn v1_round_trips_exactly() {
        let marker = Marker {
            precursor: node(1),
            successors: vec![node(2), node(3)],
            flags: 0,
            metadata: vec![("user".to_string(), "u".to_string())],
            date: (1001.0, -120 * 60),
            parents: Some(vec![node(9)]),
        };
        let encoded = encode_v1(&marker).unwrap();
        let mut decoded = decode_v1_stream(&encoded).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.remove(0), marker);
    }

    #[test]
    fn v1_distinguishes_no_parents_from_zero_parents() {
        let no_parents = Marker {
            precursor: node(1),
            successors: vec![node(2)],
            flags: 0,
            metadata: vec![],
            date: (0.0, 0),
            parents: None,
        };
        let zero_parents = Marker { parents: Some(vec![]), ..no_parents.clone() };

        let d1 = decode_v1_stream(&encode_v1(&no_parents).unwrap()).unwrap();
        let d2 = decode_v1_stream(&encode_v1(&zero_parents).unwrap()).unwrap();
        assert_eq!(d1[0].parents, None);
        assert_eq!(d2[0].parents, Some(vec![]));
    }

    #[test]
    fn stops_at_truncated_trailing_record() {
        let marker = Marker {
            precursor: node(1),
            successors: vec![node(2)],
            flags: 0,
            metadata: vec![],
            date: (0.0, 0),
            parents: None,
        };
        let mut encoded = encode_v1(&marker).unwrap();
        encoded.truncate(encoded.len() - 2);
        let decoded = decode_v1_stream(&encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn version_header_dispatches() {
        let marker = Marker {
            precursor: node(1),
            successors: vec![node(2)],
            flags: 0,
            metadata: vec![],
            date: (0.0, 0),
            parents: None,
        };
        let mut stream = vec![VERSION_V1];
        stream.extend(encode_v1(&marker).unwrap());
        let decoded = read_markers(&stream).unwrap();
        assert_eq!(decoded, vec![marker]);
    }
}
