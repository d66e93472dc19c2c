//! In-process model of tables, chains and rules
//!
//! These carry no reference to the channel they came from and outlive it
//! freely.

use serde::{Deserialize, Serialize};

use crate::erec::Location;
use crate::handle::Handle;

/// A named filtering domain scoped to an address family
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub handle: Handle,
    /// `NFT_TABLE_F_*` flags (e.g. dormant)
    pub flags: u32,
    /// Number of chains/sets referencing the table, as reported by the kernel
    pub use_count: u32,
}

impl Table {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            ..Self::default()
        }
    }
}

/// An ordered rule container within a table
///
/// A chain is attached to a hook point ("base chain") iff `hooknum` or
/// `priority` is non-zero; otherwise it is an ordinary chain that is only
/// reached by jumps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub handle: Handle,
    pub hooknum: u32,
    pub priority: i32,
    /// `filter`, `nat`, `route`; kernel default when unset
    pub chain_type: Option<String>,
    /// Base chain policy verdict code (`NF_ACCEPT` = 1, `NF_DROP` = 0)
    pub policy: Option<u32>,
    pub use_count: u32,
}

impl Chain {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            ..Self::default()
        }
    }

    pub fn with_hook(mut self, hooknum: u32, priority: i32) -> Self {
        self.hooknum = hooknum;
        self.priority = priority;
        self
    }

    pub fn has_hook(&self) -> bool {
        self.hooknum != 0 || self.priority != 0
    }
}

/// One encoded match/action expression
///
/// Opaque here: `data` is the `NFTA_EXPR_DATA` payload as produced by the
/// rule encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expr {
    pub name: String,
    pub data: Vec<u8>,
}

impl Expr {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// An ordered sequence of expressions scoped to a chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub handle: Handle,
    pub exprs: Vec<Expr>,
    /// Where the rule was written; diagnostics only, never sent
    #[serde(skip)]
    pub location: Location,
}

impl Rule {
    pub fn new(handle: Handle, exprs: Vec<Expr>) -> Self {
        Self {
            handle,
            exprs,
            location: Location::internal(),
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = location;
        self
    }
}
