//! Extracts a routing [`Fingerprint`] from a raw captured frame.
//!
//! Parses just enough of the Ethernet/IPv4/IPv6/TCP/UDP headers to derive
//! `(ethertype[, proto[, port]])`, handling IP fragmentation the way the
//! route table needs it handled: a non-initial fragment (or a frame whose
//! L4 header got fragmented away) yields port `-1` rather than failing.

use crate::error::RouterError;
use crate::route::Fingerprint;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;
const IPV6_FRAGMENT_HEADER: u8 = 44;

/// Classify the first `caplen` bytes of a captured frame.
///
/// Malformed input is a [`RouterError::Classifier`]; the caller decides
/// whether to abort the worker or drop-and-count per its classify policy.
pub fn classify(data: &[u8]) -> Result<Fingerprint, RouterError> {
    let ethertype = parse_ethertype(data)?;
    if ethertype <= 1500 {
        return Ok(Fingerprint::ethertype_only(0));
    }
    if ethertype != ETHERTYPE_IPV4 && ethertype != ETHERTYPE_IPV6 {
        return Ok(Fingerprint::ethertype_only(ethertype));
    }

    let eth_payload = data
        .get(14..)
        .ok_or_else(|| err("frame too short for an Ethernet header"))?;

    let ip = if ethertype == ETHERTYPE_IPV4 {
        parse_ipv4(eth_payload)?
    } else {
        parse_ipv6(eth_payload)?
    };

    if ip.proto != PROTO_TCP && ip.proto != PROTO_UDP {
        return Ok(Fingerprint::with_proto(ethertype, ip.proto));
    }

    let port = if ip.is_frag && ip.frag_offset != 0 {
        -1
    } else {
        match parse_l4_port(ip.payload) {
            Some(p) => p,
            None if ip.is_frag => -1,
            None => return Err(err("truncated TCP/UDP header on a non-fragment")),
        }
    };
    Ok(Fingerprint::with_port(ethertype, ip.proto, port))
}

fn err(msg: &str) -> RouterError {
    RouterError::Classifier(msg.to_string())
}

fn parse_ethertype(data: &[u8]) -> Result<u16, RouterError> {
    if data.len() < 14 {
        return Err(err("frame shorter than an Ethernet header"));
    }
    Ok(u16::from_be_bytes([data[12], data[13]]))
}

struct IpInfo<'a> {
    proto: u8,
    is_frag: bool,
    frag_offset: u16,
    payload: &'a [u8],
}

fn parse_ipv4(data: &[u8]) -> Result<IpInfo<'_>, RouterError> {
    if data.len() < 20 {
        return Err(err("frame too short for an IPv4 header"));
    }
    let version = data[0] >> 4;
    if version != 4 {
        return Err(err("IPv4 header has the wrong version nibble"));
    }
    let ihl = (data[0] & 0x0f) as usize * 4;
    if data.len() < ihl || ihl < 20 {
        return Err(err("IPv4 header length field out of range"));
    }
    let off = u16::from_be_bytes([data[6], data[7]]);
    let flags = (off >> 13) & 0x7;
    let frag_offset = off & 0x1fff;
    let dont_frag = flags & 0x2 != 0;
    let more_frag = flags & 0x1 != 0;
    if dont_frag && (frag_offset != 0 || more_frag) {
        return Err(err(
            "IPv4 don't-fragment flag set alongside fragmentation fields",
        ));
    }
    let is_frag = more_frag || frag_offset != 0;
    let proto = data[9];
    Ok(IpInfo {
        proto,
        is_frag,
        frag_offset,
        payload: &data[ihl..],
    })
}

fn parse_ipv6(data: &[u8]) -> Result<IpInfo<'_>, RouterError> {
    if data.len() < 40 {
        return Err(err("frame too short for an IPv6 header"));
    }
    let version = data[0] >> 4;
    if version != 6 {
        return Err(err("IPv6 header has the wrong version nibble"));
    }
    let mut next_header = data[6];
    let mut cursor = 40;
    let mut is_frag = false;
    let mut frag_offset = 0u16;

    // Walk extension headers looking for the fragment header; stop at the
    // first header type we don't know how to skip (treated as the final
    // upper-layer protocol, matching how most IPv6 stacks handle unknown
    // next-header values).
    loop {
        match next_header {
            IPV6_FRAGMENT_HEADER => {
                let frag_hdr = data
                    .get(cursor..cursor + 8)
                    .ok_or_else(|| err("truncated IPv6 fragment header"))?;
                let off_res_m = u16::from_be_bytes([frag_hdr[2], frag_hdr[3]]);
                frag_offset = off_res_m >> 3;
                let m_flag = off_res_m & 0x1 != 0;
                is_frag = frag_offset != 0 || m_flag;
                next_header = frag_hdr[0];
                cursor += 8;
            }
            // Hop-by-Hop (0), Routing (43), Destination Options (60):
            // second octet holds the extension header length in 8-octet
            // units, not counting the first 8 octets.
            0 | 43 | 60 => {
                let ext = data
                    .get(cursor..cursor + 2)
                    .ok_or_else(|| err("truncated IPv6 extension header"))?;
                let ext_len = (ext[1] as usize + 1) * 8;
                next_header = ext[0];
                cursor = cursor
                    .checked_add(ext_len)
                    .ok_or_else(|| err("IPv6 extension header length overflow"))?;
            }
            _ => break,
        }
    }

    let payload = data
        .get(cursor..)
        .ok_or_else(|| err("IPv6 extension headers overran the frame"))?;
    Ok(IpInfo {
        proto: next_header,
        is_frag,
        frag_offset,
        payload,
    })
}

fn parse_l4_port(payload: &[u8]) -> Option<i32> {
    if payload.len() < 4 {
        return None;
    }
    let sport = u16::from_be_bytes([payload[0], payload[1]]);
    let dport = u16::from_be_bytes([payload[2], payload[3]]);
    Some(sport.min(dport) as i32)
}
