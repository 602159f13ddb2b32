//! The compiled route table: a nested decision tree mapping
//! `(ethertype[, proto[, port]])` to an output filename pattern or DROP.
//!
//! Built once at startup by [`compiler::compile`] and read-only for the rest
//! of the run — no synchronization needed on the lookup path.

pub mod compiler;

use std::collections::HashMap;

/// Filename pattern associated with a match, or the DROP sentinel.
/// `None` is DROP; `Some(template)` is a `{ethertype}/{proto}/{port}`-style
/// format string.
pub type Pattern = Option<String>;

/// The fingerprint extracted by the classifier: a 1- to 3-component tuple
/// used as the routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub ethertype: u16,
    pub proto: Option<u8>,
    pub port: Option<i32>,
}

impl Fingerprint {
    pub fn ethertype_only(ethertype: u16) -> Self {
        Fingerprint {
            ethertype,
            proto: None,
            port: None,
        }
    }

    pub fn with_proto(ethertype: u16, proto: u8) -> Self {
        Fingerprint {
            ethertype,
            proto: Some(proto),
            port: None,
        }
    }

    pub fn with_port(ethertype: u16, proto: u8, port: i32) -> Self {
        Fingerprint {
            ethertype,
            proto: Some(proto),
            port: Some(port),
        }
    }
}

/// Outcome of a route table lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// No entry (explicit or fallback) covers this fingerprint.
    NoMatch,
    /// A matching entry resolved to the DROP sentinel.
    Drop,
    /// A matching entry resolved to this filename pattern.
    Pattern(String),
}

fn from_pattern(pattern: &Pattern) -> LookupResult {
    match pattern {
        None => LookupResult::Drop,
        Some(s) => LookupResult::Pattern(s.clone()),
    }
}

/// A node holding a catch-all fallback plus keyed children, descended into
/// by ethertype, ip_proto, and port in turn.
#[derive(Debug, Clone, Default)]
pub struct EthertypeTable {
    default: Option<Pattern>,
    children: HashMap<u16, EthertypeEntry>,
}

#[derive(Debug, Clone)]
enum EthertypeEntry {
    Leaf(Pattern),
    Node(ProtoTable),
}

#[derive(Debug, Clone, Default)]
struct ProtoTable {
    default: Option<Pattern>,
    children: HashMap<u8, ProtoEntry>,
}

#[derive(Debug, Clone)]
enum ProtoEntry {
    Leaf(Pattern),
    Node(PortTable),
}

#[derive(Debug, Clone, Default)]
struct PortTable {
    default: Option<Pattern>,
    children: HashMap<i32, Pattern>,
}

impl EthertypeTable {
    /// Look up a fingerprint. Descent order: exact key at a level wins over
    /// that level's fallback; the deepest resolvable leaf wins.
    pub fn lookup(&self, fp: &Fingerprint) -> LookupResult {
        let et_entry = match self.children.get(&fp.ethertype) {
            Some(e) => e,
            None => return self.default.as_ref().map_or(LookupResult::NoMatch, from_pattern),
        };
        let proto_table = match et_entry {
            EthertypeEntry::Leaf(p) => return from_pattern(p),
            EthertypeEntry::Node(pt) => pt,
        };
        let proto = match fp.proto {
            Some(p) => p,
            None => {
                return proto_table
                    .default
                    .as_ref()
                    .map_or(LookupResult::NoMatch, from_pattern)
            }
        };
        let proto_entry = match proto_table.children.get(&proto) {
            Some(e) => e,
            None => {
                return proto_table
                    .default
                    .as_ref()
                    .map_or(LookupResult::NoMatch, from_pattern)
            }
        };
        let port_table = match proto_entry {
            ProtoEntry::Leaf(p) => return from_pattern(p),
            ProtoEntry::Node(pt) => pt,
        };
        let port = match fp.port {
            Some(p) => p,
            None => {
                return port_table
                    .default
                    .as_ref()
                    .map_or(LookupResult::NoMatch, from_pattern)
            }
        };
        match port_table.children.get(&port) {
            Some(p) => from_pattern(p),
            None => port_table
                .default
                .as_ref()
                .map_or(LookupResult::NoMatch, from_pattern),
        }
    }
}

/// Substitute a fingerprint's components into a `{ethertype}/{proto}/{port}`
/// style filename pattern. Missing components render as an empty token,
/// matching how the classifier omits proto/port for non-IP and non-port
/// fingerprints.
pub fn format_pattern(pattern: &str, fp: &Fingerprint) -> String {
    let ethertype = fp.ethertype.to_string();
    let proto = fp.proto.map(|p| p.to_string()).unwrap_or_default();
    let port = fp.port.map(|p| p.to_string()).unwrap_or_default();
    pattern
        .replace("{ethertype}", &ethertype)
        .replace("{proto}", &proto)
        .replace("{port}", &port)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_table(pattern: Pattern) -> EthertypeTable {
        let mut t = EthertypeTable::default();
        t.default = Some(pattern);
        t
    }

    #[test]
    fn no_entry_and_no_default_is_no_match() {
        let t = EthertypeTable::default();
        assert_eq!(
            t.lookup(&Fingerprint::ethertype_only(0x0806)),
            LookupResult::NoMatch
        );
    }

    #[test]
    fn top_level_default_applies_to_any_ethertype() {
        let t = leaf_table(Some("all.pcap".into()));
        assert_eq!(
            t.lookup(&Fingerprint::ethertype_only(0x0806)),
            LookupResult::Pattern("all.pcap".into())
        );
    }

    #[test]
    fn explicit_leaf_wins_over_default() {
        let mut t = leaf_table(Some("default.pcap".into()));
        t.children
            .insert(0x0806, EthertypeEntry::Leaf(Some("arp.pcap".into())));
        assert_eq!(
            t.lookup(&Fingerprint::ethertype_only(0x0806)),
            LookupResult::Pattern("arp.pcap".into())
        );
    }

    #[test]
    fn drop_leaf_is_distinguishable_but_same_effect_as_no_match() {
        let mut t = EthertypeTable::default();
        t.children.insert(0x0800, EthertypeEntry::Leaf(None));
        assert_eq!(
            t.lookup(&Fingerprint::ethertype_only(0x0800)),
            LookupResult::Drop
        );
    }

    #[test]
    fn descends_through_proto_and_port_nodes() {
        let mut port_table = PortTable::default();
        port_table.children.insert(22, Some("ssh.pcap".into()));
        let mut proto_table = ProtoTable::default();
        proto_table
            .children
            .insert(6, ProtoEntry::Node(port_table));
        let mut t = EthertypeTable::default();
        t.children
            .insert(0x0800, EthertypeEntry::Node(proto_table));

        assert_eq!(
            t.lookup(&Fingerprint::with_port(0x0800, 6, 22)),
            LookupResult::Pattern("ssh.pcap".into())
        );
        assert_eq!(
            t.lookup(&Fingerprint::with_port(0x0800, 6, 80)),
            LookupResult::NoMatch
        );
    }

    #[test]
    fn format_pattern_substitutes_all_components() {
        let fp = Fingerprint::with_port(0x0800, 6, 22);
        assert_eq!(format_pattern("{ethertype}/{proto}/{port}", &fp), "2048/6/22");
    }

    #[test]
    fn format_pattern_leaves_missing_components_empty() {
        let fp = Fingerprint::ethertype_only(0x0806);
        assert_eq!(format_pattern("frag-{port}.pcap", &fp), "frag-.pcap");
    }
}
