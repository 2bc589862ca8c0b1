//! Address values, parsing and arithmetic.

use crate::error::AddressError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Maximum number of groups any family uses.
const MAX_GROUPS: usize = 8;

/// Compression marker for runs of zero groups (wide family only).
const COMPRESSION: &str = "::";

/// Address family: group count, group width and textual notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// 8 groups of 16 bits, hex, `:` separated.
    V6,
    /// 4 groups of 8 bits, decimal, `.` separated.
    V4,
}

impl AddressFamily {
    /// Number of groups in an address of this family.
    pub const fn group_count(self) -> usize {
        match self {
            AddressFamily::V6 => 8,
            AddressFamily::V4 => 4,
        }
    }

    /// Width of a single group in bits.
    pub const fn group_bits(self) -> u32 {
        match self {
            AddressFamily::V6 => 16,
            AddressFamily::V4 => 8,
        }
    }

    /// Largest value a single group can hold.
    pub const fn group_max(self) -> u16 {
        match self {
            AddressFamily::V6 => 0xffff,
            AddressFamily::V4 => 0xff,
        }
    }

    /// Total address width in bits.
    pub const fn bits(self) -> u32 {
        self.group_bits() * self.group_count() as u32
    }

    /// Group separator in textual form.
    pub const fn separator(self) -> char {
        match self {
            AddressFamily::V6 => ':',
            AddressFamily::V4 => '.',
        }
    }

    const fn radix(self) -> u32 {
        match self {
            AddressFamily::V6 => 16,
            AddressFamily::V4 => 10,
        }
    }

    /// Maximum digits per group in textual form.
    const fn digits(self) -> usize {
        match self {
            AddressFamily::V6 => 4,
            AddressFamily::V4 => 3,
        }
    }

    /// Detect the family of a textual address.
    fn detect(text: &str) -> Result<Self, AddressError> {
        if text.contains(':') {
            Ok(AddressFamily::V6)
        } else if text.contains('.') {
            Ok(AddressFamily::V4)
        } else {
            Err(AddressError::format(text, "no group separator"))
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V6 => write!(f, "v6"),
            AddressFamily::V4 => write!(f, "v4"),
        }
    }
}

/// An immutable address.
///
/// Ordering is group by group, most significant first. Only addresses of the
/// same family are meaningfully comparable; callers that mix families should
/// check [`Address::family`] first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    family: AddressFamily,
    groups: [u16; MAX_GROUPS],
}

impl Address {
    /// Build an address from explicit group values.
    pub fn new(family: AddressFamily, groups: &[u16]) -> Result<Self, AddressError> {
        let rendered = || {
            groups
                .iter()
                .map(|g| g.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };

        if groups.len() != family.group_count() {
            return Err(AddressError::format(
                &rendered(),
                format!(
                    "expected {} groups, found {}",
                    family.group_count(),
                    groups.len()
                ),
            ));
        }

        if let Some(g) = groups.iter().find(|g| **g > family.group_max()) {
            return Err(AddressError::format(
                &rendered(),
                format!("group value {} exceeds {}", g, family.group_max()),
            ));
        }

        let mut buf = [0u16; MAX_GROUPS];
        buf[..groups.len()].copy_from_slice(groups);
        Ok(Self {
            family,
            groups: buf,
        })
    }

    /// Parse a textual address, detecting its family from the separator.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        Self::parse_as(AddressFamily::detect(text)?, text)
    }

    /// Parse a textual address of a known family.
    ///
    /// The wide family accepts a single `::` standing for one or more zero
    /// groups; the result is always expanded to the full group count.
    pub fn parse_as(family: AddressFamily, text: &str) -> Result<Self, AddressError> {
        let groups = match family {
            AddressFamily::V6 => parse_wide(text)?,
            AddressFamily::V4 => parse_groups(family, text, text)?,
        };

        if groups.len() != family.group_count() {
            return Err(AddressError::format(
                text,
                format!(
                    "expected {} groups, found {}",
                    family.group_count(),
                    groups.len()
                ),
            ));
        }

        Self::new(family, &groups)
    }

    /// The address family.
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Group values, most significant first.
    pub fn groups(&self) -> &[u16] {
        &self.groups[..self.family.group_count()]
    }

    /// The address that follows this one.
    ///
    /// Adds one to the least significant group and carries leftwards. Fails
    /// with [`AddressError::Overflow`] when every group is already at its
    /// maximum; it never wraps around to zero.
    pub fn increment(&self) -> Result<Self, AddressError> {
        let max = self.family.group_max();
        let count = self.family.group_count();
        let mut groups = self.groups;

        for i in (0..count).rev() {
            if groups[i] < max {
                groups[i] += 1;
                return Ok(Self {
                    family: self.family,
                    groups,
                });
            }
            groups[i] = 0;
        }

        Err(AddressError::Overflow(self.to_string()))
    }

    /// Canonical uncompressed textual form.
    pub fn format(&self) -> String {
        self.groups()
            .iter()
            .map(|g| self.format_group(*g))
            .collect::<Vec<_>>()
            .join(&self.family.separator().to_string())
    }

    /// Convert to a standard library IP address.
    pub fn to_ip_addr(&self) -> IpAddr {
        match self.family {
            AddressFamily::V6 => {
                let g = &self.groups;
                IpAddr::V6(Ipv6Addr::new(
                    g[0], g[1], g[2], g[3], g[4], g[5], g[6], g[7],
                ))
            }
            AddressFamily::V4 => {
                let g = &self.groups;
                IpAddr::V4(Ipv4Addr::new(g[0] as u8, g[1] as u8, g[2] as u8, g[3] as u8))
            }
        }
    }

    fn format_group(&self, group: u16) -> String {
        match self.family {
            AddressFamily::V6 => format!("{:04x}", group),
            AddressFamily::V4 => group.to_string(),
        }
    }

    /// Group rendered to the family's full digit width.
    fn padded_group(&self, group: u16) -> String {
        match self.family {
            AddressFamily::V6 => format!("{:04x}", group),
            AddressFamily::V4 => format!("{:03}", group),
        }
    }
}

/// Parse the wide notation, expanding a `::` run of zero groups.
fn parse_wide(text: &str) -> Result<Vec<u16>, AddressError> {
    let family = AddressFamily::V6;
    let count = family.group_count();

    match text.matches(COMPRESSION).count() {
        0 => parse_groups(family, text, text),
        1 => {
            if text.contains(":::") {
                return Err(AddressError::format(text, "malformed compression marker"));
            }

            let (head, tail) = text
                .split_once(COMPRESSION)
                .ok_or_else(|| AddressError::format(text, "malformed compression marker"))?;

            let head = if head.is_empty() {
                Vec::new()
            } else {
                parse_groups(family, head, text)?
            };
            let tail = if tail.is_empty() {
                Vec::new()
            } else {
                parse_groups(family, tail, text)?
            };

            // The marker must stand for at least one group.
            if head.len() + tail.len() >= count {
                return Err(AddressError::format(
                    text,
                    format!(
                        "compressed address has {} explicit groups",
                        head.len() + tail.len()
                    ),
                ));
            }

            let mut groups = head;
            groups.resize(count - tail.len(), 0);
            groups.extend(tail);
            Ok(groups)
        }
        _ => Err(AddressError::format(text, "more than one compression marker")),
    }
}

/// Parse separator-delimited groups without any compression.
fn parse_groups(family: AddressFamily, part: &str, input: &str) -> Result<Vec<u16>, AddressError> {
    part.split(family.separator())
        .map(|digits| parse_group(family, digits, input))
        .collect()
}

fn parse_group(family: AddressFamily, digits: &str, input: &str) -> Result<u16, AddressError> {
    if digits.is_empty() {
        return Err(AddressError::format(input, "empty group"));
    }

    if digits.len() > family.digits() {
        return Err(AddressError::format(
            input,
            format!("group '{}' has more than {} digits", digits, family.digits()),
        ));
    }

    if !digits.chars().all(|c| c.is_digit(family.radix())) {
        return Err(AddressError::format(
            input,
            format!("group '{}' is not a valid {} group", digits, family),
        ));
    }

    let value = u16::from_str_radix(digits, family.radix())
        .map_err(|e| AddressError::format(input, e.to_string()))?;

    if value > family.group_max() {
        return Err(AddressError::format(
            input,
            format!("group value {} exceeds {}", value, family.group_max()),
        ));
    }

    Ok(value)
}

/// Longest shared prefix of two addresses, group by group then digit by digit.
///
/// Fully shared groups are returned in canonical group notation. If the first
/// differing group still shares leading digits (compared at full digit
/// width), those digits are appended as a final partial element. Addresses of
/// different families share nothing.
pub fn common_prefix_groups(a: &Address, b: &Address) -> Vec<String> {
    let mut prefix = Vec::new();
    if a.family != b.family {
        return prefix;
    }

    for (ga, gb) in a.groups().iter().zip(b.groups()) {
        if ga == gb {
            prefix.push(a.format_group(*ga));
            continue;
        }

        let partial: String = a
            .padded_group(*ga)
            .chars()
            .zip(b.padded_group(*gb).chars())
            .take_while(|(x, y)| x == y)
            .map(|(x, _)| x)
            .collect();

        if !partial.is_empty() {
            prefix.push(partial);
        }
        break;
    }

    prefix
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.format())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        let mut groups = [0u16; MAX_GROUPS];
        match ip {
            IpAddr::V6(v6) => {
                groups.copy_from_slice(&v6.segments());
                Self {
                    family: AddressFamily::V6,
                    groups,
                }
            }
            IpAddr::V4(v4) => {
                for (slot, octet) in groups.iter_mut().zip(v4.octets()) {
                    *slot = octet as u16;
                }
                Self {
                    family: AddressFamily::V4,
                    groups,
                }
            }
        }
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Address::parse(&text).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    fn v6(text: &str) -> Address {
        Address::parse(text).unwrap()
    }

    #[test]
    fn test_parse_full_wide_address() {
        let addr = v6("2a03:b0c0:0002:00d0:0000:0000:01c0:f000");
        assert_eq!(addr.family(), AddressFamily::V6);
        assert_eq!(
            addr.groups(),
            &[0x2a03, 0xb0c0, 0x2, 0xd0, 0, 0, 0x1c0, 0xf000]
        );
    }

    #[test]
    fn test_parse_expands_compression() {
        let addr = v6("2a03:b0c0:2:d0::1c0:f000");
        assert_eq!(addr.format(), "2a03:b0c0:0002:00d0:0000:0000:01c0:f000");

        assert_eq!(v6("::").groups(), &[0; 8]);
        assert_eq!(v6("::1").groups(), &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(v6("fc00::").groups(), &[0xfc00, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(v6("1:2:3:4:5:6::8").groups(), &[1, 2, 3, 4, 5, 6, 0, 8]);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(v6("FC00::ABCD"), v6("fc00::abcd"));
    }

    #[test]
    fn test_parse_rejects_malformed_wide() {
        let bad = [
            "",
            "1::2::3",
            "1:2:3:4:5:6:7",
            "1:2:3:4:5:6:7:8:9",
            "1:2:3:4::5:6:7:8",
            "2a03:b0c0:42322:d0::1c0:f000",
            "2a03:b0c0:2:d0::1c0:g000",
            ":1:2:3:4:5:6:7",
            "1:2:3:4:5:6:7:",
            "1:::2",
        ];

        for text in bad {
            let result = Address::parse_as(AddressFamily::V6, text);
            assert!(
                matches!(result, Err(AddressError::InvalidFormat { .. })),
                "expected {:?} to be rejected, got {:?}",
                text,
                result
            );
        }
    }

    #[test]
    fn test_parse_narrow() {
        let addr = Address::parse("192.168.1.43").unwrap();
        assert_eq!(addr.family(), AddressFamily::V4);
        assert_eq!(addr.groups(), &[192, 168, 1, 43]);
        assert_eq!(addr.format(), "192.168.1.43");
    }

    #[test]
    fn test_parse_rejects_malformed_narrow() {
        let malformed = [
            "255.213.523.10",
            "1.2.3",
            "1.2.3.4.5",
            "1..3.4",
            "a.b.c.d",
            "1234.1.1.1",
        ];
        for text in malformed {
            assert!(Address::parse(text).is_err(), "{} should be rejected", text);
        }
    }

    #[test]
    fn test_parse_without_separator() {
        assert!(matches!(
            Address::parse("12345"),
            Err(AddressError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_format_round_trip() {
        for text in [
            "::",
            "::1",
            "fc00::1:2",
            "2a03:b0c0:2:d0::1c0:f00f",
            "ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff",
            "10.0.0.1",
            "255.255.255.255",
        ] {
            let addr = Address::parse(text).unwrap();
            assert_eq!(Address::parse(&addr.format()).unwrap(), addr);
        }
    }

    #[test]
    fn test_increment_simple() {
        assert_eq!(v6("::1").increment().unwrap(), v6("::2"));
        assert_eq!(
            Address::parse("192.168.1.43").unwrap().increment().unwrap(),
            Address::parse("192.168.1.44").unwrap()
        );
    }

    #[test]
    fn test_increment_carries() {
        assert_eq!(v6("::ffff").increment().unwrap(), v6("::1:0"));
        assert_eq!(v6("::ffff:ffff").increment().unwrap(), v6("::1:0:0"));
        assert_eq!(
            Address::parse("192.168.1.255").unwrap().increment().unwrap(),
            Address::parse("192.168.2.0").unwrap()
        );
    }

    #[test]
    fn test_increment_overflow() {
        let max = Address::new(AddressFamily::V6, &[0xffff; 8]).unwrap();
        assert!(matches!(max.increment(), Err(AddressError::Overflow(_))));

        let max = Address::parse("255.255.255.255").unwrap();
        assert!(matches!(max.increment(), Err(AddressError::Overflow(_))));
    }

    #[test]
    fn test_increment_is_strictly_increasing() {
        let mut addr = v6("fc00::fffd");
        for _ in 0..8 {
            let next = addr.increment().unwrap();
            assert_eq!(next.cmp(&addr), Ordering::Greater);
            addr = next;
        }
        assert_eq!(addr, v6("fc00::1:5"));
    }

    #[test]
    fn test_compare() {
        assert_eq!(v6("::1").cmp(&v6("::2")), Ordering::Less);
        assert_eq!(v6("1::").cmp(&v6("::ffff")), Ordering::Greater);
        assert_eq!(v6("::5").cmp(&v6("0:0:0:0:0:0:0:5")), Ordering::Equal);
    }

    #[test]
    fn test_new_rejects_bad_groups() {
        assert!(Address::new(AddressFamily::V4, &[1, 2, 3]).is_err());
        assert!(Address::new(AddressFamily::V4, &[1, 2, 3, 256]).is_err());
        assert!(Address::new(AddressFamily::V6, &[0xffff; 8]).is_ok());
    }

    #[test]
    fn test_common_prefix_full_groups() {
        let a = v6("2a03:b0c0:2:d0::1c0:f000");
        let b = v6("2a03:b0c0:2:d0::1cf:f000");
        assert_eq!(
            common_prefix_groups(&a, &b),
            vec!["2a03", "b0c0", "0002", "00d0", "0000", "0000", "01c"]
        );
    }

    #[test]
    fn test_common_prefix_digit_level() {
        let a = v6("2a03:b0c0:2:d0::1c0:f000");
        let b = v6("2a03:b0c0:2:d0::1c0:f00f");
        assert_eq!(
            common_prefix_groups(&a, &b),
            vec!["2a03", "b0c0", "0002", "00d0", "0000", "0000", "01c0", "f00"]
        );
    }

    #[test]
    fn test_common_prefix_narrow_and_mixed() {
        let a = Address::parse("192.168.1.0").unwrap();
        let b = Address::parse("192.168.1.255").unwrap();
        assert_eq!(common_prefix_groups(&a, &b), vec!["192", "168", "1"]);

        assert!(common_prefix_groups(&a, &v6("::1")).is_empty());
    }

    #[test]
    fn test_ip_addr_conversion() {
        let addr = v6("fc00::1");
        let ip: IpAddr = "fc00::1".parse().unwrap();
        assert_eq!(addr.to_ip_addr(), ip);
        assert_eq!(Address::from(ip), addr);

        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(Address::from(ip).to_ip_addr(), ip);
    }

    #[test]
    fn test_serde_as_string() {
        let addr = v6("fc00::1");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"fc00:0000:0000:0000:0000:0000:0000:0001\"");

        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);

        assert!(serde_json::from_str::<Address>("\"not-an-address\"").is_err());
    }
}
