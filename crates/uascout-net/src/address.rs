//! IPv4 address ranges.
//!
//! A range is an inclusive `[low, high]` interval of IPv4 addresses, optionally
//! tagged with the interface it was derived from. Ranges are written as CIDR
//! blocks (`192.168.1.0/24`), explicit intervals (`10.0.0.1-10.0.0.20`) or
//! single addresses, separated by `;` or `,`.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use uascout_core::ParseError;

use crate::interfaces::NetInterface;

/// Prefix an interface range is clamped to in fast mode
const FAST_PREFIX: u8 = 24;

/// An inclusive range of IPv4 addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressRange {
    low: u32,
    high: u32,
    nic: Option<String>,
}

impl AddressRange {
    /// Creates a range from two addresses in any order.
    pub fn new(a: Ipv4Addr, b: Ipv4Addr) -> Self {
        let (a, b) = (u32::from(a), u32::from(b));
        Self {
            low: a.min(b),
            high: a.max(b),
            nic: None,
        }
    }

    /// Creates a range holding one address.
    pub fn single(addr: Ipv4Addr) -> Self {
        Self::new(addr, addr)
    }

    /// Creates the range covered by a CIDR block.
    pub fn from_cidr(addr: Ipv4Addr, prefix: u8) -> Result<Self, ParseError> {
        if prefix > 32 {
            return Err(ParseError::address(
                format!("{}/{}", addr, prefix),
                "prefix out of range",
            ));
        }
        let (network, broadcast) = cidr_bounds(u32::from(addr), prefix);
        Ok(Self {
            low: network,
            high: broadcast,
            nic: None,
        })
    }

    /// Creates the host range of an interface subnet.
    ///
    /// With `full` unset the subnet is narrowed to the /24 around the interface
    /// address. Network and broadcast addresses are excluded for prefixes up
    /// to /30.
    pub fn from_interface(iface: &NetInterface, full: bool) -> Self {
        let prefix = if full {
            iface.prefix_len.min(32)
        } else {
            iface.prefix_len.clamp(FAST_PREFIX, 32)
        };
        let (mut low, mut high) = cidr_bounds(u32::from(iface.address), prefix);
        if prefix <= 30 {
            low += 1;
            high -= 1;
        }
        Self {
            low,
            high,
            nic: Some(iface.name.clone()),
        }
    }

    /// Tags the range with an interface name.
    pub fn with_nic(mut self, nic: impl Into<String>) -> Self {
        self.nic = Some(nic.into());
        self
    }

    pub fn low(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.low)
    }

    pub fn high(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.high)
    }

    /// Name of the interface this range was derived from.
    pub fn nic(&self) -> Option<&str> {
        self.nic.as_deref()
    }

    /// Number of addresses in the range.
    pub fn count(&self) -> u64 {
        u64::from(self.high - self.low) + 1
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let addr = u32::from(addr);
        self.low <= addr && addr <= self.high
    }

    /// Iterates the addresses of the range in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + Send + 'static {
        (self.low..=self.high).map(Ipv4Addr::from)
    }

    /// Parses a list of ranges separated by `;` or `,`.
    ///
    /// Empty input yields an empty list.
    pub fn parse(value: &str) -> Result<Vec<AddressRange>, ParseError> {
        value
            .split([';', ','])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(AddressRange::from_str)
            .collect()
    }

    /// Formats a list of ranges the way `parse` reads them.
    pub fn format(ranges: &[AddressRange]) -> String {
        ranges
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Sorts ranges and coalesces overlapping or adjacent ones.
    pub fn merge(mut ranges: Vec<AddressRange>) -> Vec<AddressRange> {
        ranges.sort_by_key(|r| (r.low, r.high));
        let mut merged: Vec<AddressRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.low <= last.high.saturating_add(1) => {
                    last.high = last.high.max(range.high);
                }
                _ => merged.push(range),
            }
        }
        merged
    }

    /// Total number of addresses over a list of ranges.
    pub fn total(ranges: &[AddressRange]) -> u64 {
        ranges.iter().map(AddressRange::count).sum()
    }

    /// Returns the CIDR prefix if the range is exactly one aligned block.
    fn as_cidr(&self) -> Option<u8> {
        let size = u64::from(self.high - self.low) + 1;
        if !size.is_power_of_two() {
            return None;
        }
        let host_bits = size.trailing_zeros();
        let prefix = 32 - host_bits as u8;
        let mask = prefix_mask(prefix);
        (self.low & !mask == 0).then_some(prefix)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.low == self.high {
            return write!(f, "{}", self.low());
        }
        match self.as_cidr() {
            Some(prefix) => write!(f, "{}/{}", self.low(), prefix),
            None => write!(f, "{}-{}", self.low(), self.high()),
        }
    }
}

impl FromStr for AddressRange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty {
                field: "address range".to_string(),
            });
        }

        let parse_addr = |part: &str| {
            part.trim()
                .parse::<Ipv4Addr>()
                .map_err(|e| ParseError::address(s, e.to_string()))
        };

        if let Some((addr, prefix)) = s.split_once('/') {
            let prefix = prefix
                .trim()
                .parse::<u8>()
                .map_err(|e| ParseError::address(s, e.to_string()))?;
            return AddressRange::from_cidr(parse_addr(addr)?, prefix);
        }

        if let Some((low, high)) = s.split_once('-') {
            return Ok(AddressRange::new(parse_addr(low)?, parse_addr(high)?));
        }

        Ok(AddressRange::single(parse_addr(s)?))
    }
}

fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn cidr_bounds(addr: u32, prefix: u8) -> (u32, u32) {
    let mask = prefix_mask(prefix);
    let network = addr & mask;
    (network, network | !mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(addr: [u8; 4], prefix: u8) -> NetInterface {
        NetInterface {
            name: "eth0".to_string(),
            address: Ipv4Addr::from(addr),
            prefix_len: prefix,
            gateway: None,
        }
    }

    #[test]
    fn test_parse_cidr() {
        let ranges = AddressRange::parse("172.16.5.10/20").unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].low(), Ipv4Addr::new(172, 16, 0, 0));
        assert_eq!(ranges[0].high(), Ipv4Addr::new(172, 16, 15, 255));
        assert_eq!(ranges[0].count(), 4096);
    }

    #[test]
    fn test_parse_list() {
        let ranges =
            AddressRange::parse("192.168.1.0/24; 10.0.0.20-10.0.0.1,10.1.1.1").unwrap();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[1].low(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ranges[1].count(), 20);
        assert_eq!(ranges[2].count(), 1);
        assert_eq!(AddressRange::total(&ranges), 256 + 20 + 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(AddressRange::parse("999.1.2.3/24").is_err());
        assert!(AddressRange::parse("192.168.0.1/33").is_err());
        assert!(AddressRange::parse("10.0.0.1-banana").is_err());
        assert!(AddressRange::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_format_round_trips() {
        let text = "192.168.1.0/24;10.0.0.1-10.0.0.20;10.1.1.1";
        let ranges = AddressRange::parse(text).unwrap();
        assert_eq!(AddressRange::format(&ranges), text);
    }

    #[test]
    fn test_interface_range_excludes_network_and_broadcast() {
        let range = AddressRange::from_interface(&iface([192, 168, 1, 42], 24), true);
        assert_eq!(range.low(), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(range.high(), Ipv4Addr::new(192, 168, 1, 254));
        assert_eq!(range.nic(), Some("eth0"));
        assert_eq!(range.count(), 254);
    }

    #[test]
    fn test_interface_range_clamped_to_24() {
        let wide = iface([10, 20, 30, 40], 16);
        let fast = AddressRange::from_interface(&wide, false);
        assert_eq!(fast.low(), Ipv4Addr::new(10, 20, 30, 1));
        assert_eq!(fast.high(), Ipv4Addr::new(10, 20, 30, 254));

        let full = AddressRange::from_interface(&wide, true);
        assert_eq!(full.count(), 65534);

        // Narrow subnets stay as they are
        let narrow = AddressRange::from_interface(&iface([10, 0, 0, 5], 30), false);
        assert_eq!(narrow.count(), 2);
    }

    #[test]
    fn test_point_to_point_keeps_both_addresses() {
        let range = AddressRange::from_interface(&iface([10, 0, 0, 1], 31), true);
        assert_eq!(range.count(), 2);
        let host = AddressRange::from_interface(&iface([10, 0, 0, 1], 32), true);
        assert_eq!(host.count(), 1);
    }

    #[test]
    fn test_merge_coalesces() {
        let merged = AddressRange::merge(vec![
            AddressRange::parse("10.0.0.1-10.0.0.254").unwrap().remove(0),
            AddressRange::single(Ipv4Addr::new(10, 0, 0, 1)),
            AddressRange::single(Ipv4Addr::new(10, 0, 0, 255)),
            AddressRange::single(Ipv4Addr::new(192, 168, 0, 1)),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].count(), 255);
    }

    #[test]
    fn test_iter() {
        let range = AddressRange::parse("10.0.0.254-10.0.1.1").unwrap().remove(0);
        let addrs: Vec<_> = range.iter().collect();
        assert_eq!(
            addrs,
            vec![
                Ipv4Addr::new(10, 0, 0, 254),
                Ipv4Addr::new(10, 0, 0, 255),
                Ipv4Addr::new(10, 0, 1, 0),
                Ipv4Addr::new(10, 0, 1, 1),
            ]
        );
    }
}
