//! `--self-test`: a quick in-process smoke check of the classifier and
//! route compiler, run instead of starting any capture. Exists so a
//! packaged binary can sanity-check itself without standing up a full
//! external test harness.
//!
//! Covers: route-compile determinism, classifier fixtures for
//! IPv4/IPv6/fragment/ARP/802.3, and round-trip filename formatting.

use crate::classify::classify;
use crate::config::{RawConfig, RawOutput};
use crate::route::compiler::compile;
use crate::route::{format_pattern, Fingerprint, LookupResult};

/// Run the built-in smoke checks. Returns `true` if every check passed;
/// logs each failure at error level as it's found.
pub fn run() -> bool {
    let mut ok = true;

    if !check("classifies an 802.3 length-field frame as ethertype 0", || {
        let frame = length_field_frame();
        matches!(classify(&frame), Ok(fp) if fp == Fingerprint::ethertype_only(0))
    }) {
        ok = false;
    }

    if !check("classifies an ARP frame as ethertype-only 0x0806", || {
        let frame = eth_frame(0x0806, &[0u8; 28]);
        matches!(classify(&frame), Ok(fp) if fp == Fingerprint::ethertype_only(0x0806))
    }) {
        ok = false;
    }

    if !check("classifies an IPv4 TCP frame's lesser port", || {
        let frame = eth_frame(0x0800, &ipv4_tcp_packet(0, 80, 22));
        matches!(
            classify(&frame),
            Ok(fp) if fp == Fingerprint::with_port(0x0800, 6, 22)
        )
    }) {
        ok = false;
    }

    if !check("classifies an IPv6 UDP frame's lesser port", || {
        let frame = eth_frame(0x86dd, &ipv6_udp_packet(5353, 53));
        matches!(
            classify(&frame),
            Ok(fp) if fp == Fingerprint::with_port(0x86dd, 17, 53)
        )
    }) {
        ok = false;
    }

    if !check("a non-initial IPv4 fragment classifies with port -1", || {
        let frame = eth_frame(0x0800, &ipv4_fragment_packet());
        matches!(
            classify(&frame),
            Ok(fp) if fp == Fingerprint::with_port(0x0800, 17, -1)
        )
    }) {
        ok = false;
    }

    if !check("compiles a catch-all route and resolves any fingerprint", || {
        let raw = RawConfig {
            interfaces: None,
            snaplen: None,
            outputs: Some(vec![RawOutput {
                pattern: Some("all.pcap".into()),
                matches: vec![Default::default()],
            }]),
        };
        match compile(&raw) {
            Ok(table) => matches!(
                table.lookup(&Fingerprint::with_port(0x0800, 6, 443)),
                LookupResult::Pattern(ref p) if p == "all.pcap"
            ),
            Err(_) => false,
        }
    }) {
        ok = false;
    }

    if !check("a config with no outputs drops everything", || {
        let table = compile(&RawConfig::default()).expect("empty config always compiles");
        matches!(
            table.lookup(&Fingerprint::ethertype_only(0x0806)),
            LookupResult::NoMatch
        )
    }) {
        ok = false;
    }

    if !check("route compilation is deterministic", || {
        let raw = RawConfig {
            interfaces: None,
            snaplen: None,
            outputs: Some(vec![RawOutput {
                pattern: Some("a.pcap".into()),
                matches: vec![Default::default()],
            }]),
        };
        let (Ok(t1), Ok(t2)) = (compile(&raw), compile(&raw)) else {
            return false;
        };
        let fp = Fingerprint::with_port(0x0800, 6, 443);
        t1.lookup(&fp) == t2.lookup(&fp)
    }) {
        ok = false;
    }

    if !check("filename pattern round-trips a fingerprint's components", || {
        let fp = Fingerprint::with_port(0x0800, 6, 22);
        format_pattern("{ethertype}/{proto}/{port}", &fp) == "2048/6/22"
    }) {
        ok = false;
    }

    ok
}

fn check(name: &str, f: impl FnOnce() -> bool) -> bool {
    let passed = f();
    if passed {
        tracing::info!(check = name, "self-test passed");
    } else {
        tracing::error!(check = name, "self-test failed");
    }
    passed
}

fn length_field_frame() -> Vec<u8> {
    let mut v = vec![0u8; 12];
    v.extend_from_slice(&1500u16.to_be_bytes());
    v
}

fn eth_frame(ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut v = vec![0u8; 12];
    v.extend_from_slice(&ethertype.to_be_bytes());
    v.extend_from_slice(payload);
    v
}

fn ipv4_header(proto: u8, off_field: u16, total_len: u16) -> Vec<u8> {
    let mut h = vec![0u8; 20];
    h[0] = 0x45;
    h[2..4].copy_from_slice(&total_len.to_be_bytes());
    h[6..8].copy_from_slice(&off_field.to_be_bytes());
    h[9] = proto;
    h
}

fn ipv4_tcp_packet(off_field: u16, sport: u16, dport: u16) -> Vec<u8> {
    let mut ip = ipv4_header(6, off_field, 40);
    let mut tcp = vec![0u8; 20];
    tcp[0..2].copy_from_slice(&sport.to_be_bytes());
    tcp[2..4].copy_from_slice(&dport.to_be_bytes());
    ip.extend_from_slice(&tcp);
    ip
}

fn ipv6_udp_packet(sport: u16, dport: u16) -> Vec<u8> {
    let mut ip = vec![0u8; 40];
    ip[0] = 0x60;
    ip[6] = 17; // UDP
    let mut udp = vec![0u8; 8];
    udp[0..2].copy_from_slice(&sport.to_be_bytes());
    udp[2..4].copy_from_slice(&dport.to_be_bytes());
    ip.extend_from_slice(&udp);
    ip
}

fn ipv4_fragment_packet() -> Vec<u8> {
    // frag_offset = 100, no flags, non-initial fragment: no L4 header follows.
    let mut ip = ipv4_header(17, 100, 20);
    ip.truncate(20);
    ip
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_test_passes() {
        assert!(run());
    }
}
