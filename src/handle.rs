//! Object identity: address families and handles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Address family of a table, with the kernel's `NFPROTO_*` values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Family {
    /// Wildcard in filters; never reported by the kernel for an object
    #[default]
    Unspec = 0,
    Inet = 1,
    Ip = 2,
    Arp = 3,
    Netdev = 5,
    Bridge = 7,
    Ip6 = 10,
}

impl Family {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn is_unspec(self) -> bool {
        matches!(self, Family::Unspec)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Family::Unspec => "unspec",
            Family::Inet => "inet",
            Family::Ip => "ip",
            Family::Arp => "arp",
            Family::Netdev => "netdev",
            Family::Bridge => "bridge",
            Family::Ip6 => "ip6",
        }
    }
}

impl TryFrom<u8> for Family {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Family::Unspec),
            1 => Ok(Family::Inet),
            2 => Ok(Family::Ip),
            3 => Ok(Family::Arp),
            5 => Ok(Family::Netdev),
            7 => Ok(Family::Bridge),
            10 => Ok(Family::Ip6),
            other => Err(other),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Family {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unspec" => Ok(Family::Unspec),
            "inet" => Ok(Family::Inet),
            "ip" => Ok(Family::Ip),
            "arp" => Ok(Family::Arp),
            "netdev" => Ok(Family::Netdev),
            "bridge" => Ok(Family::Bridge),
            "ip6" => Ok(Family::Ip6),
            other => Err(format!("unknown address family '{}'", other)),
        }
    }
}

/// Identity of a table, chain or rule
///
/// A handle either addresses one object or, when partially populated, acts
/// as a filter: an unset table/chain name or a zero rule id matches
/// anything, and so does `Family::Unspec`.
///
/// Handles are values; there are no setters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    family: Family,
    table: Option<String>,
    chain: Option<String>,
    /// Kernel-assigned rule handle, 0 = unassigned
    handle: u64,
}

impl Handle {
    /// Family-only handle, e.g. for listing every table of a family
    pub fn new(family: Family) -> Self {
        Self {
            family,
            ..Self::default()
        }
    }

    pub fn table(family: Family, table: impl Into<String>) -> Self {
        Self {
            family,
            table: Some(table.into()),
            ..Self::default()
        }
    }

    pub fn chain(family: Family, table: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            family,
            table: Some(table.into()),
            chain: Some(chain.into()),
            handle: 0,
        }
    }

    pub fn rule(
        family: Family,
        table: impl Into<String>,
        chain: impl Into<String>,
        handle: u64,
    ) -> Self {
        Self {
            family,
            table: Some(table.into()),
            chain: Some(chain.into()),
            handle,
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn chain_name(&self) -> Option<&str> {
        self.chain.as_deref()
    }

    pub fn rule_handle(&self) -> u64 {
        self.handle
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.family)?;
        if let Some(table) = &self.table {
            write!(f, " {}", table)?;
        }
        if let Some(chain) = &self.chain {
            write!(f, " {}", chain)?;
        }
        if self.handle != 0 {
            write!(f, " handle {}", self.handle)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_round_trip_through_kernel_value() {
        for family in [Family::Inet, Family::Ip, Family::Ip6, Family::Bridge] {
            assert_eq!(Family::try_from(family.as_u8()), Ok(family));
        }
        assert_eq!(Family::try_from(4), Err(4));
    }

    #[test]
    fn test_family_from_str() {
        assert_eq!("ip6".parse::<Family>(), Ok(Family::Ip6));
        assert!("ipx".parse::<Family>().is_err());
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(Handle::new(Family::Inet).to_string(), "inet");
        assert_eq!(
            Handle::rule(Family::Ip, "filter", "input", 4).to_string(),
            "ip filter input handle 4"
        );
    }

    #[test]
    fn test_handle_scopes() {
        let h = Handle::chain(Family::Inet, "filter", "input");
        assert_eq!(h.table_name(), Some("filter"));
        assert_eq!(h.chain_name(), Some("input"));
        assert_eq!(h.rule_handle(), 0);
    }
}
