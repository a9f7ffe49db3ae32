//! Node identifiers.
//!
//! A node is the content hash of a changeset, manifest or file revision.
//! This crate supports both the legacy 20-byte SHA-1 identifiers and the
//! 32-byte SHA-256 identifiers used once a repository upgrades, matching the
//! two widths the obsolescence-marker framings (`v0`/`v1`) and the tag
//! filenode cache need to distinguish via `MarkerFlags::USING_SHA256`.

use crate::error::{CResult, Error};
use std::fmt;

pub const SHA1_LEN: usize = 20;
pub const SHA256_LEN: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Node {
    Sha1([u8; SHA1_LEN]),
    Sha256([u8; SHA256_LEN]),
}

impl Node {
    pub const NULL_SHA1: Node = Node::Sha1([0u8; SHA1_LEN]);
    pub const NULL_SHA256: Node = Node::Sha256([0u8; SHA256_LEN]);

    pub fn null_of_len(len: usize) -> CResult<Node> {
        match len {
            SHA1_LEN => Ok(Node::NULL_SHA1),
            SHA256_LEN => Ok(Node::NULL_SHA256),
            other => Err(Error::Value(format!("unsupported node width {}", other))),
        }
    }

    pub fn is_null(&self) -> bool {
        self.as_bytes().iter().all(|b| *b == 0)
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Sha1(_) => SHA1_LEN,
            Node::Sha256(_) => SHA256_LEN,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Node::Sha1(b) => b,
            Node::Sha256(b) => b,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> CResult<Node> {
        match bytes.len() {
            SHA1_LEN => {
                let mut buf = [0u8; SHA1_LEN];
                buf.copy_from_slice(bytes);
                Ok(Node::Sha1(buf))
            }
            SHA256_LEN => {
                let mut buf = [0u8; SHA256_LEN];
                buf.copy_from_slice(bytes);
                Ok(Node::Sha256(buf))
            }
            other => Err(Error::Value(format!("unsupported node width {}", other))),
        }
    }

    /// Parses a node from its lowercase hex representation.
    pub fn from_hex(s: &str) -> CResult<Node> {
        if s.len() % 2 != 0 {
            return Err(Error::Parse(format!("odd-length hex node: {}", s)));
        }
        let mut bytes = Vec::with_capacity(s.len() / 2);
        let chars: Vec<char> = s.chars().collect();
        for pair in chars.chunks(2) {
            let byte = u8::from_str_radix(&pair.iter().collect::<String>(), 16)
                .map_err(|e| Error::Parse(format!("invalid hex node {}: {}", s, e)))?;
            bytes.push(byte);
        }
        Node::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        self.as_bytes().iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// The first 4 bytes of the node, used as the verifying prefix in the
    /// tag filenode cache.
    pub fn prefix4(&self) -> [u8; 4] {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.as_bytes()[..4]);
        buf
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12.min(self.len() * 2)])
    }
}

/// Revision numbers are dense, non-negative indices into a changelog. The
/// "null revision" (no such changeset) is represented as `None` at call
/// sites instead of the `-1` sentinel the original store used, since `Option`
/// composes better with Rust's iterator and control-flow idioms.
pub type Revision = u64;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let n = Node::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        assert_eq!(n.to_hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(n.len(), SHA1_LEN);
    }

    #[test]
    fn null_is_null() {
        assert!(Node::NULL_SHA1.is_null());
        assert!(!Node::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap().is_null());
    }

    #[test]
    fn rejects_odd_length() {
        assert!(Node::from_hex("abc").is_err());
    }

    /// Random synthetic nodes round-trip through hex and raw bytes,
    /// matching the teacher's `random_ops` fuzz-lite test pattern
    /// (`kv/src/storage/log_cask.rs`).
    #[test]
    fn random_nodes_round_trip_through_hex_and_bytes() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let width = if rng.gen_bool(0.5) { SHA1_LEN } else { SHA256_LEN };
            let bytes: Vec<u8> = (0..width).map(|_| rng.gen()).collect();
            let n = Node::from_bytes(&bytes).unwrap();
            assert_eq!(n.as_bytes(), bytes.as_slice());
            assert_eq!(Node::from_hex(&n.to_hex()).unwrap(), n);
        }
    }
}
