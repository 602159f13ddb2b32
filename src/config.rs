//! Centralized runtime constants and the raw configuration tree.
//!
//! All tunable intervals and sizes are collected here so they can be found
//! and adjusted in a single place rather than scattered across modules.
//! `RawConfig` is the deserialized shape of the configuration file handed to
//! the route compiler ([`crate::route::compiler`]); nothing downstream of
//! compilation sees raw YAML.

use serde::Deserialize;

/// Read timeout for a live capture source, in milliseconds. Bounds how long
/// a worker can block in `dispatch` before re-checking the shutdown flag.
pub const LIVE_READ_TIMEOUT_MS: i32 = 250;

/// Default snapshot length (max bytes captured per frame) when the
/// configuration does not override it.
pub const DEFAULT_SNAPLEN: i32 = 65535;

/// How often the Supervisor polls the worker completion channel while
/// waiting, in milliseconds. Short enough to stay responsive to interrupts.
pub const SUPERVISOR_POLL_MS: u64 = 250;

/// How often the stats logger wakes up and reports counters, in seconds.
pub const STATS_LOG_INTERVAL_SECS: u64 = 5;

/// The raw configuration tree as deserialized from YAML (or any format the
/// caller has already turned into this shape — see the system spec's
/// "assume a deserialized tree of primitives/lists/maps is handed in").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    /// Interface names and/or paths to saved capture files. One capture
    /// worker is spawned per entry. Absent means "one worker on the capture
    /// library's default source".
    #[serde(default)]
    pub interfaces: Option<Vec<String>>,

    /// Ordered list of `(pattern, matches)` pairs compiled into the route
    /// table. Absent means "all packets dropped".
    #[serde(default)]
    pub outputs: Option<Vec<RawOutput>>,

    /// Snapshot length override; falls back to [`DEFAULT_SNAPLEN`].
    #[serde(default)]
    pub snaplen: Option<i32>,
}

/// One `(pattern, matches)` entry of the `outputs` configuration key.
///
/// `pattern` is `None` for the DROP sentinel, `Some(template)` otherwise.
/// `matches` is the list of protomatch tuples this pattern applies to.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOutput {
    pub pattern: Option<String>,
    #[serde(default)]
    pub matches: Vec<RawMatch>,
}

/// A single protomatch tuple: `(ethertype_spec?, proto_spec?, port_spec?)`.
/// Each position is omitted ("match anything at this level") or a spec.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMatch {
    #[serde(default)]
    pub ethertype: Option<RawSpec>,
    #[serde(default)]
    pub proto: Option<RawSpec>,
    #[serde(default)]
    pub port: Option<RawSpec>,
}

/// A spec at a single position: either one scalar value or a list of
/// scalars / half-open ranges. Scalars may be symbolic names (`"tcp"`,
/// `"ipv4"`, `"fragment"`, ...), integers, or numeric strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSpec {
    Single(RawValue),
    List(Vec<RawRangeItem>),
}

/// One entry of a `RawSpec::List`: a scalar or an explicit `(lo, hi)`
/// half-open range.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawRangeItem {
    Value(RawValue),
    Range(RawValue, RawValue),
}

/// A scalar config value: symbolic name, integer, or numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Int(i64),
    Str(String),
}

/// Top-level keys [`RawConfig`] understands. Anything else in the document
/// is ignored, with a warning, rather than silently accepted or rejected.
const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["interfaces", "outputs", "snaplen"];

/// Parse a configuration document into a [`RawConfig`], warning (via
/// `tracing::warn!`) about any top-level key this crate doesn't recognize,
/// per the spec's "unknown top-level keys are ignored with a warning".
/// `serde`'s derived `Deserialize` has no way to observe keys it drops, so
/// this first parses into a generic [`serde_yaml::Value`] to check the key
/// set, then deserializes that same value into `RawConfig`.
pub fn parse_config(text: &str) -> Result<RawConfig, serde_yaml::Error> {
    let value: serde_yaml::Value = serde_yaml::from_str(text)?;
    if let serde_yaml::Value::Mapping(map) = &value {
        for key in map.keys() {
            if let Some(key) = key.as_str() {
                if !KNOWN_TOP_LEVEL_KEYS.contains(&key) {
                    tracing::warn!(key, "ignoring unknown configuration key");
                }
            }
        }
    }
    serde_yaml::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_catch_all_config() {
        let yaml = "outputs:\n  - pattern: all.pcap\n    matches:\n      - {}\n";
        let cfg: RawConfig = serde_yaml::from_str(yaml).unwrap();
        let outputs = cfg.outputs.unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].pattern.as_deref(), Some("all.pcap"));
        assert_eq!(outputs[0].matches.len(), 1);
    }

    #[test]
    fn parses_drop_pattern_as_null() {
        let yaml = "outputs:\n  - pattern: null\n    matches:\n      - ethertype: ipv4\n        proto: tcp\n        port: ssh\n";
        let cfg: RawConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.outputs.unwrap()[0].pattern, None);
    }

    #[test]
    fn absent_interfaces_and_outputs_are_none() {
        let cfg: RawConfig = serde_yaml::from_str("{}").unwrap();
        assert!(cfg.interfaces.is_none());
        assert!(cfg.outputs.is_none());
    }

    #[test]
    fn parse_config_ignores_unknown_top_level_keys() {
        let yaml = "interfaces: [eth0]\nbogus_key: 42\n";
        let cfg = parse_config(yaml).unwrap();
        assert_eq!(cfg.interfaces, Some(vec!["eth0".to_string()]));
    }

    #[test]
    fn parses_range_list_spec() {
        let yaml = "outputs:\n  - pattern: x.pcap\n    matches:\n      - ethertype: [ipv4]\n        proto: [[0, 6], [7, 17], [18, 256]]\n";
        let cfg: RawConfig = serde_yaml::from_str(yaml).unwrap();
        let m = &cfg.outputs.unwrap()[0].matches[0];
        match m.proto.as_ref().unwrap() {
            RawSpec::List(items) => assert_eq!(items.len(), 3),
            _ => panic!("expected list spec"),
        }
    }
}
