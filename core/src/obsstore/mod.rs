//! The obsolescence store: marker type, on-disk framing, the indexed store
//! itself, and the pushkey wire format used to exchange markers with peers.

pub mod framing;
pub mod marker;
pub mod pushkey;
pub mod store;

pub use marker::{Marker, BUMPED_FIX, USING_SHA256};
pub use store::ObsStore;
