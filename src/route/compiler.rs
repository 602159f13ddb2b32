//! Translates the declarative `outputs` configuration into a compiled
//! [`EthertypeTable`], honoring last-match-wins semantics: entries are
//! processed in order and later entries overwrite earlier overlapping ones.

use std::collections::HashMap;

use super::{EthertypeEntry, EthertypeTable, Pattern, ProtoEntry, ProtoTable, PortTable};
use crate::config::{RawConfig, RawMatch, RawOutput, RawRangeItem, RawSpec, RawValue};
use crate::error::RouterError;

const IP_ETHERTYPES: [u16; 2] = [0x0800, 0x86dd];
const PORT_PROTOS: [u8; 2] = [6, 17];

const PROTOCOL_NAMES: &[(&str, i64)] = &[
    ("icmp", 1),
    ("igmp", 2),
    ("tcp", 6),
    ("egp", 8),
    ("udp", 17),
    ("gre", 47),
    ("esp", 50),
    ("ah", 51),
    ("icmpv6", 58),
    ("ospf", 89),
    ("sctp", 132),
];

const TCP_SERVICES: &[(&str, i64)] = &[
    ("ftp-data", 20),
    ("ftp", 21),
    ("ssh", 22),
    ("telnet", 23),
    ("smtp", 25),
    ("domain", 53),
    ("http", 80),
    ("pop3", 110),
    ("imap", 143),
    ("https", 443),
];

const UDP_SERVICES: &[(&str, i64)] = &[
    ("domain", 53),
    ("bootps", 67),
    ("bootpc", 68),
    ("tftp", 69),
    ("ntp", 123),
    ("snmp", 161),
];

/// Compile the `outputs` key of a [`RawConfig`] into a [`EthertypeTable`].
/// An absent `outputs` key compiles to an empty table, under which every
/// fingerprint is a no-match (dropped silently, per spec).
pub fn compile(raw: &RawConfig) -> Result<EthertypeTable, RouterError> {
    let mut table = EthertypeTable::default();
    let outputs: &[RawOutput] = raw.outputs.as_deref().unwrap_or(&[]);
    for output in outputs {
        let pattern: Pattern = output.pattern.clone();
        for m in &output.matches {
            compile_match(&mut table, &pattern, m)?;
        }
    }
    Ok(table)
}

fn compile_match(table: &mut EthertypeTable, pattern: &Pattern, m: &RawMatch) -> Result<(), RouterError> {
    match &m.ethertype {
        None => {
            apply_catch_all(table, pattern);
            Ok(())
        }
        Some(spec) => {
            for (lo, hi) in expand_items(spec, ethertype_to_num, Some(-1))? {
                for et in lo..hi {
                    apply_ethertype(table, pattern, et, m)?;
                }
            }
            Ok(())
        }
    }
}

/// A zero-length protomatch: the pattern applies to every fingerprint.
/// Rebinds the whole table fresh, discarding every previously-set entry
/// (including non-IP ethertype leaves an earlier, narrower entry may have
/// installed), the way `config.py`'s `handle_protomatch` rebinds the whole
/// `outputs` dict on an empty match tuple. Pre-populates default nodes at
/// every level (including the TCP/UDP port level) so a later, narrower
/// entry under the same ethertype/proto still has something to refine.
fn apply_catch_all(table: &mut EthertypeTable, pattern: &Pattern) {
    table.default = Some(pattern.clone());
    table.children.clear();
    for &et in &IP_ETHERTYPES {
        let mut proto_table = ProtoTable {
            default: Some(pattern.clone()),
            children: HashMap::new(),
        };
        for &proto in &PORT_PROTOS {
            proto_table.children.insert(
                proto,
                ProtoEntry::Node(PortTable {
                    default: Some(pattern.clone()),
                    children: HashMap::new(),
                }),
            );
        }
        table.children.insert(et, EthertypeEntry::Node(proto_table));
    }
}

fn apply_ethertype(
    table: &mut EthertypeTable,
    pattern: &Pattern,
    ethertype: i64,
    m: &RawMatch,
) -> Result<(), RouterError> {
    if ethertype == -1 {
        // 'ip': matches both IPv4 and IPv6.
        apply_ethertype(table, pattern, 0x0800, m)?;
        apply_ethertype(table, pattern, 0x86dd, m)?;
        return Ok(());
    }
    let ethertype = u16::try_from(ethertype)
        .map_err(|_| RouterError::Config(format!("ethertype {ethertype} out of range")))?;

    if IP_ETHERTYPES.contains(&ethertype) {
        match &m.proto {
            None => {
                if m.port.is_some() {
                    return Err(RouterError::Config(
                        "port specified without a proto".into(),
                    ));
                }
                let mut proto_table = ProtoTable {
                    default: Some(pattern.clone()),
                    children: HashMap::new(),
                };
                for &proto in &PORT_PROTOS {
                    proto_table.children.insert(
                        proto,
                        ProtoEntry::Node(PortTable {
                            default: Some(pattern.clone()),
                            children: HashMap::new(),
                        }),
                    );
                }
                table
                    .children
                    .insert(ethertype, EthertypeEntry::Node(proto_table));
            }
            Some(proto_spec) => {
                let entry = table
                    .children
                    .entry(ethertype)
                    .or_insert_with(|| EthertypeEntry::Node(ProtoTable::default()));
                let proto_table = match entry {
                    EthertypeEntry::Node(pt) => pt,
                    EthertypeEntry::Leaf(_) => {
                        *entry = EthertypeEntry::Node(ProtoTable::default());
                        match entry {
                            EthertypeEntry::Node(pt) => pt,
                            EthertypeEntry::Leaf(_) => unreachable!(),
                        }
                    }
                };
                for (lo, hi) in expand_items(proto_spec, proto_to_num, None)? {
                    for proto in lo..hi {
                        apply_proto(proto_table, pattern, proto, &m.port)?;
                    }
                }
            }
        }
        Ok(())
    } else {
        if m.proto.is_some() || m.port.is_some() {
            return Err(RouterError::Config(format!(
                "proto/port specified for non-IP ethertype {ethertype}"
            )));
        }
        table
            .children
            .insert(ethertype, EthertypeEntry::Leaf(pattern.clone()));
        Ok(())
    }
}

fn apply_proto(
    proto_table: &mut ProtoTable,
    pattern: &Pattern,
    proto: i64,
    port_spec: &Option<RawSpec>,
) -> Result<(), RouterError> {
    let proto_u8 =
        u8::try_from(proto).map_err(|_| RouterError::Config(format!("proto {proto} out of range")))?;

    if PORT_PROTOS.contains(&proto_u8) {
        match port_spec {
            None => {
                proto_table.children.insert(
                    proto_u8,
                    ProtoEntry::Node(PortTable {
                        default: Some(pattern.clone()),
                        children: HashMap::new(),
                    }),
                );
            }
            Some(pspec) => {
                let entry = proto_table
                    .children
                    .entry(proto_u8)
                    .or_insert_with(|| ProtoEntry::Node(PortTable::default()));
                let port_table = match entry {
                    ProtoEntry::Node(pt) => pt,
                    ProtoEntry::Leaf(_) => {
                        *entry = ProtoEntry::Node(PortTable::default());
                        match entry {
                            ProtoEntry::Node(pt) => pt,
                            ProtoEntry::Leaf(_) => unreachable!(),
                        }
                    }
                };
                for (lo, hi) in expand_port_items(pspec, proto_u8)? {
                    for port in lo..hi {
                        let port = i32::try_from(port)
                            .map_err(|_| RouterError::Config(format!("port {port} out of range")))?;
                        port_table.children.insert(port, pattern.clone());
                    }
                }
            }
        }
    } else {
        if port_spec.is_some() {
            return Err(RouterError::Config(format!(
                "port specified for non-TCP/UDP proto {proto_u8}"
            )));
        }
        proto_table
            .children
            .insert(proto_u8, ProtoEntry::Leaf(pattern.clone()));
    }
    Ok(())
}

/// Normalize a spec into its constituent half-open `(lo, hi)` ranges,
/// resolving symbolic scalars via `resolve`. `forbid` is checked against
/// both endpoints of explicit range pairs (used to reject `'ip'` — -1 —
/// inside an ethertype range).
fn expand_items(
    spec: &RawSpec,
    resolve: impl Fn(&RawValue) -> Result<i64, RouterError>,
    forbid: Option<i64>,
) -> Result<Vec<(i64, i64)>, RouterError> {
    let items: Vec<RawRangeItem> = match spec {
        RawSpec::Single(v) => vec![RawRangeItem::Value(v.clone())],
        RawSpec::List(items) => items.clone(),
    };
    let mut ranges = Vec::with_capacity(items.len());
    for item in items {
        match item {
            RawRangeItem::Value(v) => {
                let x = resolve(&v)?;
                ranges.push((x, x + 1));
            }
            RawRangeItem::Range(lo, hi) => {
                let lo = resolve(&lo)?;
                let hi = resolve(&hi)?;
                if let Some(f) = forbid {
                    if lo == f || hi == f {
                        return Err(RouterError::Config(
                            "\"ip\" must not be used in a range".into(),
                        ));
                    }
                }
                ranges.push((lo, hi));
            }
        }
    }
    Ok(ranges)
}

/// Like [`expand_items`] but for ports, where symbol resolution needs the
/// enclosing proto (TCP vs UDP service name tables).
fn expand_port_items(spec: &RawSpec, proto: u8) -> Result<Vec<(i64, i64)>, RouterError> {
    expand_items(spec, |v| port_to_num(v, proto), None)
}

fn ethertype_to_num(v: &RawValue) -> Result<i64, RouterError> {
    match v {
        RawValue::Int(n) => Ok(*n),
        RawValue::Str(s) => match s.as_str() {
            "ip" => Ok(-1),
            "ipv4" => Ok(0x0800),
            "arp" => Ok(0x0806),
            "ipv6" => Ok(0x86dd),
            other => other
                .parse::<i64>()
                .map_err(|_| RouterError::Config(format!("unknown ethertype symbol '{other}'"))),
        },
    }
}

fn proto_to_num(v: &RawValue) -> Result<i64, RouterError> {
    match v {
        RawValue::Int(n) => Ok(*n),
        RawValue::Str(s) => {
            if let Ok(n) = s.parse::<i64>() {
                return Ok(n);
            }
            PROTOCOL_NAMES
                .iter()
                .find(|(name, _)| name == s)
                .map(|(_, n)| *n)
                .ok_or_else(|| RouterError::Config(format!("unknown protocol name '{s}'")))
        }
    }
}

fn port_to_num(v: &RawValue, proto: u8) -> Result<i64, RouterError> {
    match v {
        RawValue::Int(n) => Ok(*n),
        RawValue::Str(s) if s == "fragment" => Ok(-1),
        RawValue::Str(s) => {
            if let Ok(n) = s.parse::<i64>() {
                return Ok(n);
            }
            let table = match proto {
                6 => TCP_SERVICES,
                17 => UDP_SERVICES,
                _ => return Err(RouterError::Config("proto must be tcp or udp".into())),
            };
            table
                .iter()
                .find(|(name, _)| name == s)
                .map(|(_, n)| *n)
                .ok_or_else(|| RouterError::Config(format!("unknown service name '{s}'")))
        }
    }
}
