//! The obsolescence marker type and its bit flags.

use crate::error::{CResult, Error};
use crate::node::Node;

/// Disables transitive "bumped" inference through this marker.
pub const BUMPED_FIX: u32 = 1;
/// Node fields on this marker are 32-byte (SHA-256) rather than 20-byte.
pub const USING_SHA256: u32 = 2;

/// A history-rewrite relationship: `precursor` was rewritten into zero or
/// more `successors`. An empty successor list is a "prune" marker.
#[derive(Clone, Debug, PartialEq)]
pub struct Marker {
    pub precursor: Node,
    pub successors: Vec<Node>,
    pub flags: u32,
    /// Kept sorted by key; v0 framing relies on this for round-trip
    /// stability and the `p0`/`p1`/`p2`/`date` convention keys.
    pub metadata: Vec<(String, String)>,
    pub date: (f64, i32),
    pub parents: Option<Vec<Node>>,
}

impl Marker {
    /// Validates the invariants from the data model: no self-cycle, no null
    /// successor, consistent node width, metadata keys free of `\0`/`:`.
    pub fn validate(&self) -> CResult<()> {
        if self.successors.contains(&self.precursor) {
            return Err(Error::Corrupt("marker precursor appears in its own successors".into()));
        }
        if self.successors.iter().any(|s| s.is_null()) {
            return Err(Error::Corrupt("NULL_NODE in marker successors".into()));
        }
        let width = self.precursor.len();
        if self.successors.iter().any(|s| s.len() != width) {
            return Err(Error::Corrupt("mixed node widths in marker successors".into()));
        }
        if let Some(parents) = &self.parents {
            if parents.iter().any(|p| p.len() != width) {
                return Err(Error::Corrupt("mixed node widths in marker parents".into()));
            }
        }
        for (k, v) in &self.metadata {
            if k.contains('\0') || k.contains(':') {
                return Err(Error::Corrupt(format!("invalid metadata key {:?}", k)));
            }
            if v.contains('\0') {
                return Err(Error::Corrupt(format!("invalid metadata value for key {:?}", k)));
            }
        }
        let expect_width = if self.flags & USING_SHA256 != 0 { 32 } else { 20 };
        if width != expect_width {
            return Err(Error::Corrupt(format!(
                "node width {} does not match USING_SHA256 flag",
                width
            )));
        }
        Ok(())
    }

    pub fn sort_metadata(&mut self) {
        self.metadata.sort_by(|a, b| a.0.cmp(&b.0));
    }

    pub fn bumped_fix(&self) -> bool {
        self.flags & BUMPED_FIX != 0
    }

    pub fn using_sha256(&self) -> bool {
        self.flags & USING_SHA256 != 0
    }

    /// Renders `date` (seconds since epoch, tz offset in seconds) as an
    /// RFC 3339 timestamp in its recorded offset, for logging and display
    /// (`hg obslog`'s date column is the grounding use case). Falls back to
    /// the bare `"<secs> <tz>"` pair spec.md's v0 metadata convention uses
    /// if the timestamp is out of `chrono`'s representable range.
    pub fn formatted_date(&self) -> String {
        let (secs, tz_offset) = self.date;
        let offset = match chrono::FixedOffset::east_opt(tz_offset) {
            Some(o) => o,
            None => return format!("{} {}", secs, tz_offset),
        };
        match chrono::DateTime::from_timestamp(secs as i64, 0) {
            Some(utc) => utc.with_timezone(&offset).to_rfc3339(),
            None => format!("{} {}", secs, tz_offset),
        }
    }

    /// A total order over markers used to make `successorssets`'s divergence
    /// handling (`sorted(succmarkers[current])` in the original) and pushkey
    /// exchange deterministic. `f64` has no `Ord`, so the date is compared by
    /// bit pattern; this only needs to be a stable total order, not a
    /// numerically meaningful one.
    pub fn sort_key(
        &self,
    ) -> (&Node, &Vec<Node>, u32, &Vec<(String, String)>, u64, i32, Option<&Vec<Node>>) {
        (
            &self.precursor,
            &self.successors,
            self.flags,
            &self.metadata,
            self.date.0.to_bits(),
            self.date.1,
            self.parents.as_ref(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn node(byte: u8) -> Node {
        Node::from_bytes(&[byte; 20]).unwrap()
    }

    #[test]
    fn rejects_self_cycle() {
        let m = Marker {
            precursor: node(1),
            successors: vec![node(1)],
            flags: 0,
            metadata: vec![],
            date: (0.0, 0),
            parents: None,
        };
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_null_successor() {
        let m = Marker {
            precursor: node(1),
            successors: vec![Node::NULL_SHA1],
            flags: 0,
            metadata: vec![],
            date: (0.0, 0),
            parents: None,
        };
        assert!(m.validate().is_err());
    }

    #[test]
    fn formatted_date_renders_rfc3339_in_recorded_offset() {
        let m = Marker {
            precursor: node(1),
            successors: vec![node(2)],
            flags: 0,
            metadata: vec![],
            date: (1_700_000_000.0, -18000),
            parents: None,
        };
        let rendered = m.formatted_date();
        assert!(rendered.starts_with("2023-"), "got {}", rendered);
        assert!(rendered.ends_with("-05:00"), "got {}", rendered);
    }

    #[test]
    fn accepts_prune_marker() {
        let m = Marker {
            precursor: node(1),
            successors: vec![],
            flags: 0,
            metadata: vec![],
            date: (0.0, 0),
            parents: Some(vec![]),
        };
        assert!(m.validate().is_ok());
    }
}
