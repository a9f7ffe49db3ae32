//! Configuration surface consumed by the obsolescence, tag and copy-trace
//! components. Loading this from a file or the environment is outside this
//! crate's scope (see `SPEC_FULL.md` §1); callers build a `Config` however
//! suits their embedding and pass it by reference.

#[derive(Clone, Debug, PartialEq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct Config {
    /// `experimental.evolution`: master switch for obsolescence-aware
    /// behaviour (successor computation, `unstable`/`bumped`/`divergent`
    /// sets). Disabling it makes every changeset visible and obsolescence
    /// markers inert.
    pub evolution: bool,
    /// `experimental.disablecopytrace`: skips `mergecopies` and
    /// `backward_renames` entirely, returning empty maps.
    pub disable_copytrace: bool,
    /// `experimental.evolution.track-operation`: records the name of the
    /// command that created a marker in its metadata (`operation` key).
    pub track_operation: bool,
    /// `format.obsstore-version`: which binary framing new markers are
    /// written with.
    pub obsstore_version: ObsStoreVersion,
    /// `devel.default-date`: overrides the wall-clock date used for newly
    /// created markers, for reproducible tests.
    pub default_date: Option<(f64, i32)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde_derive::Serialize, serde_derive::Deserialize)]
pub enum ObsStoreVersion {
    V0,
    V1,
}

impl ObsStoreVersion {
    /// The version byte this crate's framing module uses to tag the header
    /// of a fresh obsstore file (`obsstore::framing::VERSION_V0`/`VERSION_V1`).
    pub fn as_byte(self) -> u8 {
        match self {
            ObsStoreVersion::V0 => 0,
            ObsStoreVersion::V1 => 1,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            evolution: true,
            disable_copytrace: false,
            track_operation: false,
            obsstore_version: ObsStoreVersion::V1,
            default_date: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert!(cfg.evolution);
        assert!(!cfg.disable_copytrace);
        assert_eq!(cfg.obsstore_version, ObsStoreVersion::V1);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = Config { default_date: Some((1.0, -3600)), ..Config::default() };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
