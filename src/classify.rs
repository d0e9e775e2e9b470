//! Address classification: IPv4 canonicalization and CIDR membership.
//!
//! Everything here is pure. Attackers reach internal hosts through alternate
//! numeral encodings (`2130706433`, `0x7f000001`, `017700000001`), so every
//! IPv4 candidate is canonicalized before it is range-tested.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Normalize an IPv4 literal in any supported encoding.
///
/// Accepted forms:
/// - dotted decimal, four segments, each `0..=255`. Leading zeros inside a
///   segment are decimal (`010.0.0.1` is `10.0.0.1`)
/// - a bare decimal integer in `1..2^32`
/// - a `0x`-prefixed 32-bit hexadecimal integer
/// - a whole-string octal numeral starting with `0` (`017700000001`)
///
/// Returns `None` for anything else.
///
/// ```
/// use hopguard::classify::normalize_ipv4;
///
/// assert_eq!(normalize_ipv4("0x7f000001").unwrap().to_string(), "127.0.0.1");
/// assert!(normalize_ipv4("1.2.3").is_none());
/// ```
pub fn normalize_ipv4(input: &str) -> Option<Ipv4Addr> {
    if input.is_empty() {
        return None;
    }

    if input.contains('.') {
        let parts: Vec<&str> = input.split('.').collect();
        if parts.len() != 4 {
            return None;
        }

        let mut octets = [0u8; 4];
        for (octet, part) in octets.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let digits = part.trim_start_matches('0');
            if digits.len() > 3 {
                return None;
            }
            let value: u16 = if digits.is_empty() { 0 } else { digits.parse().ok()? };
            *octet = u8::try_from(value).ok()?;
        }
        return Some(Ipv4Addr::from(octets));
    }

    let value = if let Some(hex) = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(hex, 16).ok()?
    } else if input.len() > 1 && input.starts_with('0') {
        if !input.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return None;
        }
        u32::from_str_radix(&input[1..], 8).ok()?
    } else {
        if !input.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match input.parse::<u32>().ok()? {
            0 => return None,
            v => v,
        }
    };

    Some(Ipv4Addr::from(value))
}

/// Cheap family discriminator: IPv6 literals always contain a colon.
pub fn is_ipv6(input: &str) -> bool {
    input.contains(':')
}

/// Check whether `ip` lies in the IPv4 block `cidr` (`network/prefix`).
///
/// Both sides go through [`normalize_ipv4`]. Anything that fails to parse is
/// reported as "not matched" so that later denylist entries still get a say.
pub fn is_ipv4_in_cidr(ip: &str, cidr: &str) -> bool {
    let Some((network, bits)) = split_cidr(cidr) else {
        return false;
    };
    if bits > 32 {
        return false;
    }
    let (Some(ip), Some(network)) = (normalize_ipv4(ip), normalize_ipv4(network)) else {
        return false;
    };

    // shifting a u32 by 32 overflows, so /0 takes the zero mask directly
    let mask = if bits == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(bits))
    };

    u32::from(ip) & mask == u32::from(network) & mask
}

/// Check whether `ip` lies in the IPv6 block `cidr`.
///
/// Both addresses are expanded to eight 16-bit groups and compared one group
/// at a time over the leading `prefix` bits.
pub fn is_ipv6_in_cidr(ip: &str, cidr: &str) -> bool {
    let Some((network, bits)) = split_cidr(cidr) else {
        return false;
    };
    if bits > 128 {
        return false;
    }
    let (Some(ip), Some(network)) = (expand_ipv6(ip), expand_ipv6(network)) else {
        return false;
    };

    let mut remaining = u32::from(bits);
    for (a, b) in ip.iter().zip(network.iter()) {
        if remaining == 0 {
            break;
        }
        let span = remaining.min(16);
        let diff = a ^ b;
        if diff != 0 && diff.leading_zeros() < span {
            return false;
        }
        remaining -= span;
    }

    true
}

/// Find the first denylist entry covering `address`.
///
/// Entries are tried in order, first match wins. A bare IPv4 entry matches by
/// numeric value, a bare IPv6 entry by address equality (or case-insensitive
/// text), and a CIDR entry by the membership test for the address's family.
///
/// An IPv4-mapped IPv6 address (`::ffff:a.b.c.d`) that matches nothing as
/// IPv6 is checked again as its embedded IPv4 address.
pub fn find_blocking_entry<S: AsRef<str>>(address: IpAddr, entries: &[S]) -> Option<&str> {
    if let Some(entry) = first_match(address, entries) {
        return Some(entry);
    }

    match address {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .and_then(|v4| first_match(IpAddr::V4(v4), entries)),
        IpAddr::V4(_) => None,
    }
}

/// Whether a denylist entry is something [`find_blocking_entry`] can ever match.
pub fn is_valid_entry(entry: &str) -> bool {
    let entry = entry.trim();
    match split_cidr(entry) {
        Some((network, bits)) if is_ipv6(entry) => bits <= 128 && expand_ipv6(network).is_some(),
        Some((network, bits)) => bits <= 32 && normalize_ipv4(network).is_some(),
        None if is_ipv6(entry) => expand_ipv6(entry).is_some(),
        None => normalize_ipv4(entry).is_some(),
    }
}

fn first_match<S: AsRef<str>>(address: IpAddr, entries: &[S]) -> Option<&str> {
    let text = address.to_string();
    entries
        .iter()
        .map(|e| e.as_ref().trim())
        .find(|entry| entry_matches(address, &text, entry))
}

fn entry_matches(address: IpAddr, text: &str, entry: &str) -> bool {
    let is_cidr = entry.contains('/');
    match address {
        IpAddr::V4(_) if is_ipv6(entry) => false,
        IpAddr::V6(_) if !is_ipv6(entry) => false,
        IpAddr::V4(_) if is_cidr => is_ipv4_in_cidr(text, entry),
        IpAddr::V6(_) if is_cidr => is_ipv6_in_cidr(text, entry),
        IpAddr::V4(v4) => normalize_ipv4(entry) == Some(v4),
        IpAddr::V6(v6) => {
            entry.eq_ignore_ascii_case(text) || entry.parse::<Ipv6Addr>().is_ok_and(|e| e == v6)
        }
    }
}

fn split_cidr(cidr: &str) -> Option<(&str, u8)> {
    let (network, bits) = cidr.trim().split_once('/')?;
    if bits.is_empty() || !bits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((network, bits.parse().ok()?))
}

fn expand_ipv6(input: &str) -> Option<[u16; 8]> {
    let bare = input.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<Ipv6Addr>().ok().map(|addr| addr.segments())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DEFAULT_BLOCKED_RANGES;

    use ipnet::{Ipv4Net, Ipv6Net};
    use proptest::prelude::*;

    fn norm(input: &str) -> Option<String> {
        normalize_ipv4(input).map(|ip| ip.to_string())
    }

    // ==================== normalize_ipv4 ====================

    #[test]
    fn test_normalize_equivalent_encodings() {
        for input in ["127.0.0.1", "2130706433", "0x7f000001", "0X7F000001", "017700000001"] {
            assert_eq!(norm(input).as_deref(), Some("127.0.0.1"), "input {input}");
        }
    }

    #[test]
    fn test_normalize_metadata_encodings() {
        for input in ["169.254.169.254", "2852039166", "0xa9fea9fe", "025177524776"] {
            assert_eq!(norm(input).as_deref(), Some("169.254.169.254"), "input {input}");
        }
    }

    #[test]
    fn test_normalize_dotted_leading_zeros_are_decimal() {
        assert_eq!(norm("010.000.000.001").as_deref(), Some("10.0.0.1"));
        assert_eq!(norm("0127.0.0.1").as_deref(), Some("127.0.0.1"));
        assert_eq!(norm("192.168.001.010").as_deref(), Some("192.168.1.10"));
    }

    #[test]
    fn test_normalize_rejects_malformed() {
        for input in [
            "",
            "0",
            "0x",
            "0x1g",
            "089",
            "1.2.3",
            "1.2.3.4.5",
            "256.0.0.1",
            "1.2.3.-4",
            "1..2.3",
            "a.b.c.d",
            "example.com",
            "4294967296",
            "0x100000000",
            "+1",
            "::1",
        ] {
            assert!(normalize_ipv4(input).is_none(), "input {input:?} should be invalid");
        }
    }

    #[test]
    fn test_normalize_integer_bounds() {
        assert_eq!(norm("1").as_deref(), Some("0.0.0.1"));
        assert_eq!(norm("4294967295").as_deref(), Some("255.255.255.255"));
        assert_eq!(norm("0xffffffff").as_deref(), Some("255.255.255.255"));
    }

    #[test]
    fn test_is_ipv6() {
        assert!(is_ipv6("::1"));
        assert!(is_ipv6("fe80::1"));
        assert!(!is_ipv6("127.0.0.1"));
        assert!(!is_ipv6("2130706433"));
    }

    // ==================== IPv4 CIDR ====================

    #[test]
    fn test_ipv4_cidr_boundaries() {
        assert!(is_ipv4_in_cidr("172.31.255.255", "172.16.0.0/12"));
        assert!(is_ipv4_in_cidr("172.16.0.0", "172.16.0.0/12"));
        assert!(!is_ipv4_in_cidr("172.32.0.0", "172.16.0.0/12"));
        assert!(!is_ipv4_in_cidr("172.15.255.255", "172.16.0.0/12"));

        assert!(is_ipv4_in_cidr("10.255.255.255", "10.0.0.0/8"));
        assert!(!is_ipv4_in_cidr("11.0.0.0", "10.0.0.0/8"));

        assert!(is_ipv4_in_cidr("192.168.200.1", "192.168.0.0/16"));
        assert!(!is_ipv4_in_cidr("192.169.0.0", "192.168.0.0/16"));
    }

    #[test]
    fn test_ipv4_cidr_zero_prefix_matches_everything() {
        assert!(is_ipv4_in_cidr("8.8.8.8", "0.0.0.0/0"));
        assert!(is_ipv4_in_cidr("255.255.255.255", "0.0.0.0/0"));
        assert!(is_ipv4_in_cidr("1.2.3.4", "10.0.0.0/0"));
    }

    #[test]
    fn test_ipv4_cidr_host_prefix() {
        assert!(is_ipv4_in_cidr("192.168.1.100", "192.168.1.100/32"));
        assert!(!is_ipv4_in_cidr("192.168.1.101", "192.168.1.100/32"));
    }

    #[test]
    fn test_ipv4_cidr_alternate_encodings() {
        assert!(is_ipv4_in_cidr("2130706433", "127.0.0.0/8"));
        assert!(is_ipv4_in_cidr("0x0a000001", "10.0.0.0/8"));
        assert!(is_ipv4_in_cidr("127.0.0.1", "0x7f000000/8"));
    }

    #[test]
    fn test_ipv4_cidr_parse_failures_do_not_match() {
        assert!(!is_ipv4_in_cidr("not-an-ip", "0.0.0.0/0"));
        assert!(!is_ipv4_in_cidr("10.0.0.1", "10.0.0.0"));
        assert!(!is_ipv4_in_cidr("10.0.0.1", "10.0.0.0/33"));
        assert!(!is_ipv4_in_cidr("10.0.0.1", "10.0.0.0/x"));
        assert!(!is_ipv4_in_cidr("::1", "::1/128"));
    }

    // ==================== IPv6 CIDR ====================

    #[test]
    fn test_ipv6_cidr_link_local() {
        assert!(is_ipv6_in_cidr("fe80::1", "fe80::/10"));
        assert!(is_ipv6_in_cidr("febf:ffff::1", "fe80::/10"));
        assert!(!is_ipv6_in_cidr("fec0::1", "fe80::/10"));
    }

    #[test]
    fn test_ipv6_cidr_unique_local() {
        assert!(is_ipv6_in_cidr("fc00::1", "fc00::/7"));
        assert!(is_ipv6_in_cidr("fd12:3456:789a::1", "fc00::/7"));
        assert!(!is_ipv6_in_cidr("fe00::1", "fc00::/7"));
    }

    #[test]
    fn test_ipv6_cidr_exact_and_zero() {
        assert!(is_ipv6_in_cidr("::1", "::1/128"));
        assert!(is_ipv6_in_cidr("0:0:0:0:0:0:0:1", "::1/128"));
        assert!(!is_ipv6_in_cidr("::2", "::1/128"));
        assert!(is_ipv6_in_cidr("2001:4860:4860::8888", "::/0"));
    }

    #[test]
    fn test_ipv6_cidr_prefix_inside_group() {
        assert!(is_ipv6_in_cidr("2001:db8:ffff::1", "2001:db8::/32"));
        assert!(!is_ipv6_in_cidr("2001:db9::1", "2001:db8::/32"));
        assert!(is_ipv6_in_cidr("2001:db8:8000::", "2001:db8:8000::/33"));
        assert!(!is_ipv6_in_cidr("2001:db8:7fff::", "2001:db8:8000::/33"));
    }

    #[test]
    fn test_ipv6_cidr_parse_failures_do_not_match() {
        assert!(!is_ipv6_in_cidr("not:valid:ipv6", "::/0"));
        assert!(!is_ipv6_in_cidr("::1", "::1/129"));
        assert!(!is_ipv6_in_cidr("::1", "::1"));
    }

    // ==================== Denylist matching ====================

    #[test]
    fn test_default_ranges_block_internal_addresses() {
        let cases = [
            ("127.0.0.1", "127.0.0.0/8"),
            ("10.1.2.3", "10.0.0.0/8"),
            ("172.20.0.1", "172.16.0.0/12"),
            ("192.168.1.1", "192.168.0.0/16"),
            ("169.254.169.254", "169.254.0.0/16"),
            ("239.255.255.250", "224.0.0.0/4"),
            ("::1", "::1/128"),
            ("fe80::1", "fe80::/10"),
            ("fd00:ec2::254", "fc00::/7"),
        ];
        for (addr, expected) in cases {
            let ip: IpAddr = addr.parse().unwrap();
            assert_eq!(find_blocking_entry(ip, DEFAULT_BLOCKED_RANGES), Some(expected));
        }
    }

    #[test]
    fn test_default_ranges_allow_public_addresses() {
        for addr in ["8.8.8.8", "93.184.216.34", "172.32.0.1", "2001:4860:4860::8888"] {
            let ip: IpAddr = addr.parse().unwrap();
            assert_eq!(find_blocking_entry(ip, DEFAULT_BLOCKED_RANGES), None, "{addr}");
        }
    }

    #[test]
    fn test_first_match_wins() {
        let entries = ["10.0.0.0/16", "10.0.0.0/8"];
        let ip: IpAddr = "10.0.1.1".parse().unwrap();
        assert_eq!(find_blocking_entry(ip, &entries), Some("10.0.0.0/16"));

        let ip: IpAddr = "10.9.1.1".parse().unwrap();
        assert_eq!(find_blocking_entry(ip, &entries), Some("10.0.0.0/8"));
    }

    #[test]
    fn test_literal_entries() {
        let entries = ["2130706433", "FE80::ABCD", "0:0:0:0:0:0:0:2"];

        assert_eq!(
            find_blocking_entry("127.0.0.1".parse().unwrap(), &entries),
            Some("2130706433")
        );
        assert_eq!(
            find_blocking_entry("fe80::abcd".parse().unwrap(), &entries),
            Some("FE80::ABCD")
        );
        assert_eq!(
            find_blocking_entry("::2".parse().unwrap(), &entries),
            Some("0:0:0:0:0:0:0:2")
        );
        assert_eq!(find_blocking_entry("127.0.0.2".parse().unwrap(), &entries), None);
    }

    #[test]
    fn test_family_mismatch_never_matches() {
        let entries = ["::/0"];
        assert_eq!(find_blocking_entry("1.2.3.4".parse().unwrap(), &entries), None);

        let entries = ["0.0.0.0/0"];
        assert_eq!(find_blocking_entry("2001:db8::1".parse().unwrap(), &entries), None);
    }

    #[test]
    fn test_ipv4_mapped_ipv6_checked_as_ipv4() {
        let ip: IpAddr = "::ffff:127.0.0.1".parse().unwrap();
        assert_eq!(find_blocking_entry(ip, DEFAULT_BLOCKED_RANGES), Some("127.0.0.0/8"));

        let ip: IpAddr = "::ffff:169.254.169.254".parse().unwrap();
        assert_eq!(
            find_blocking_entry(ip, DEFAULT_BLOCKED_RANGES),
            Some("169.254.0.0/16")
        );

        let ip: IpAddr = "::ffff:8.8.8.8".parse().unwrap();
        assert_eq!(find_blocking_entry(ip, DEFAULT_BLOCKED_RANGES), None);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let entries = ["garbage", "10.0.0.0/99", "10.0.0.0/8"];
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(find_blocking_entry(ip, &entries), Some("10.0.0.0/8"));
    }

    #[test]
    fn test_is_valid_entry() {
        for entry in DEFAULT_BLOCKED_RANGES {
            assert!(is_valid_entry(entry), "{entry}");
        }
        assert!(is_valid_entry("100.100.100.200"));
        assert!(is_valid_entry("fd00:ec2::254"));
        assert!(!is_valid_entry("10.0.0.0/33"));
        assert!(!is_valid_entry("fe80::/129"));
        assert!(!is_valid_entry("example.com"));
        assert!(!is_valid_entry("10.0.0/8"));
    }

    // ==================== Properties ====================

    proptest! {
        #[test]
        fn prop_encodings_normalize_identically(value in 1u32..=u32::MAX) {
            let canonical = Ipv4Addr::from(value);
            let dotted = canonical.to_string();

            prop_assert_eq!(normalize_ipv4(&dotted), Some(canonical));
            prop_assert_eq!(normalize_ipv4(&value.to_string()), Some(canonical));
            prop_assert_eq!(normalize_ipv4(&format!("0x{value:x}")), Some(canonical));
            prop_assert_eq!(normalize_ipv4(&format!("0{value:o}")), Some(canonical));
        }

        #[test]
        fn prop_ipv4_cidr_agrees_with_bitmask(ip in any::<u32>(), network in any::<u32>(), bits in 0u8..=32) {
            let ip = Ipv4Addr::from(ip);
            let network = Ipv4Addr::from(network);
            let net = Ipv4Net::new(network, bits).unwrap();
            let cidr = format!("{network}/{bits}");

            prop_assert_eq!(is_ipv4_in_cidr(&ip.to_string(), &cidr), net.contains(&ip));
        }

        #[test]
        fn prop_ipv6_cidr_agrees_with_bitmask(ip in any::<u128>(), network in any::<u128>(), bits in 0u8..=128) {
            let ip = Ipv6Addr::from(ip);
            let network = Ipv6Addr::from(network);
            let net = Ipv6Net::new(network, bits).unwrap();
            let cidr = format!("{network}/{bits}");

            prop_assert_eq!(is_ipv6_in_cidr(&ip.to_string(), &cidr), net.contains(&ip));
        }

        #[test]
        fn prop_ipv4_cidr_near_network(network in any::<u32>(), bits in 0u8..=32, offset in 0u32..4) {
            // addresses right at and around the block edges
            let net = Ipv4Net::new(Ipv4Addr::from(network), bits).unwrap();
            let cidr = format!("{}/{bits}", Ipv4Addr::from(network));
            let edges = [
                u32::from(net.network()).wrapping_sub(offset),
                u32::from(net.broadcast()).wrapping_add(offset),
            ];
            for edge in edges {
                let ip = Ipv4Addr::from(edge);
                prop_assert_eq!(is_ipv4_in_cidr(&ip.to_string(), &cidr), net.contains(&ip));
            }
        }
    }
}
