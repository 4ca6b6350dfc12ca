//! TCP port ranges.

use std::fmt;
use std::str::FromStr;

use uascout_core::ParseError;

/// An inclusive range of TCP ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRange {
    lower: u16,
    upper: u16,
}

impl PortRange {
    /// Creates a range from two ports in any order.
    pub fn new(a: u16, b: u16) -> Self {
        Self {
            lower: a.min(b),
            upper: a.max(b),
        }
    }

    pub fn single(port: u16) -> Self {
        Self::new(port, port)
    }

    /// Every usable port.
    pub fn all() -> Vec<PortRange> {
        vec![PortRange::new(1, u16::MAX)]
    }

    /// System ports plus the registered OPC UA ports.
    pub fn well_known() -> Vec<PortRange> {
        vec![PortRange::new(1, 1023), PortRange::new(4840, 4843)]
    }

    /// Ports outside the system port range.
    pub fn unassigned() -> Vec<PortRange> {
        vec![PortRange::new(1024, u16::MAX)]
    }

    /// Ports commonly used by OPC UA servers.
    pub fn opcua() -> Vec<PortRange> {
        vec![
            PortRange::new(4840, 4841),
            PortRange::single(4843),
            PortRange::new(4848, 4849),
            PortRange::new(48000, 48050),
            PortRange::single(49320),
            PortRange::new(51200, 51210),
            PortRange::single(53530),
            PortRange::single(62541),
        ]
    }

    pub fn lower(&self) -> u16 {
        self.lower
    }

    pub fn upper(&self) -> u16 {
        self.upper
    }

    pub fn count(&self) -> u64 {
        u64::from(self.upper - self.lower) + 1
    }

    pub fn contains(&self, port: u16) -> bool {
        self.lower <= port && port <= self.upper
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + Send + 'static {
        self.lower..=self.upper
    }

    /// Parses ranges separated by `,` or `;`. `*` stands for all ports.
    pub fn parse(value: &str) -> Result<Vec<PortRange>, ParseError> {
        value
            .split([',', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PortRange::from_str)
            .collect()
    }

    pub fn format(ranges: &[PortRange]) -> String {
        ranges
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Total number of ports over a list of ranges.
    pub fn total(ranges: &[PortRange]) -> u64 {
        ranges.iter().map(PortRange::count).sum()
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lower == self.upper {
            write!(f, "{}", self.lower)
        } else {
            write!(f, "{}-{}", self.lower, self.upper)
        }
    }
}

impl FromStr for PortRange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(PortRange::new(1, u16::MAX));
        }

        let parse_port = |part: &str| -> Result<u16, ParseError> {
            let port = part
                .trim()
                .parse::<u16>()
                .map_err(|e| ParseError::port(s, e.to_string()))?;
            if port == 0 {
                return Err(ParseError::port(s, "port 0 is not a valid port"));
            }
            Ok(port)
        };

        match s.split_once('-') {
            Some((lower, upper)) => Ok(PortRange::new(parse_port(lower)?, parse_port(upper)?)),
            None => Ok(PortRange::single(parse_port(s)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let ranges = PortRange::parse("4840-4841, 48010;50000-49990").unwrap();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[2], PortRange::new(49990, 50000));
        assert_eq!(PortRange::format(&ranges), "4840-4841,48010,49990-50000");
        assert_eq!(PortRange::total(&ranges), 2 + 1 + 11);
    }

    #[test]
    fn test_parse_wildcard() {
        assert_eq!(PortRange::parse("*").unwrap(), PortRange::all());
    }

    #[test]
    fn test_parse_rejects_invalid_ports() {
        assert!(PortRange::parse("0").is_err());
        assert!(PortRange::parse("70000").is_err());
        assert!(PortRange::parse("4840-abc").is_err());
    }

    #[test]
    fn test_presets() {
        assert_eq!(PortRange::total(&PortRange::all()), 65535);
        assert_eq!(PortRange::total(&PortRange::unassigned()), 65535 - 1023);
        assert!(PortRange::well_known().iter().any(|r| r.contains(4840)));
        assert!(PortRange::opcua().iter().any(|r| r.contains(4840)));
        assert!(PortRange::opcua().iter().any(|r| r.contains(48010)));
        assert!(!PortRange::opcua().iter().any(|r| r.contains(80)));
    }
}
