//! Protocol descriptors for tables, chains and rules
//!
//! A descriptor is the attribute-level form of an object: every field is
//! optional because it is either "set" (sent to / reported by the kernel)
//! or not. The same types are built from a `Handle` for requests and
//! decoded from kernel messages for responses, which lets a request
//! descriptor double as a filter over a snapshot.
//!
//! Descriptors are plain owned values. They never leave the operation that
//! built them and are released when it returns, on every path.

use std::fmt;

use crate::handle::{Family, Handle};
use crate::netlink::message::{AttrWriter, Attributes, MessageError, parse_attributes};
use crate::netlink::structures::*;

/// Which kind of object a message or descriptor is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Table,
    Chain,
    Rule,
}

/// What a request does with its object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgOp {
    New,
    Get,
    Del,
}

impl ObjectKind {
    pub const fn name(self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::Chain => "chain",
            ObjectKind::Rule => "rule",
        }
    }

    /// `NFT_MSG_*` value for `op` on this kind
    pub const fn msg_type(self, op: MsgOp) -> u8 {
        match (self, op) {
            (ObjectKind::Table, MsgOp::New) => NFT_MSG_NEWTABLE,
            (ObjectKind::Table, MsgOp::Get) => NFT_MSG_GETTABLE,
            (ObjectKind::Table, MsgOp::Del) => NFT_MSG_DELTABLE,
            (ObjectKind::Chain, MsgOp::New) => NFT_MSG_NEWCHAIN,
            (ObjectKind::Chain, MsgOp::Get) => NFT_MSG_GETCHAIN,
            (ObjectKind::Chain, MsgOp::Del) => NFT_MSG_DELCHAIN,
            (ObjectKind::Rule, MsgOp::New) => NFT_MSG_NEWRULE,
            (ObjectKind::Rule, MsgOp::Get) => NFT_MSG_GETRULE,
            (ObjectKind::Rule, MsgOp::Del) => NFT_MSG_DELRULE,
        }
    }

    /// Inverse of `msg_type`, for messages received from the kernel
    pub const fn from_msg_type(msg: u8) -> Option<(ObjectKind, MsgOp)> {
        match msg {
            NFT_MSG_NEWTABLE => Some((ObjectKind::Table, MsgOp::New)),
            NFT_MSG_GETTABLE => Some((ObjectKind::Table, MsgOp::Get)),
            NFT_MSG_DELTABLE => Some((ObjectKind::Table, MsgOp::Del)),
            NFT_MSG_NEWCHAIN => Some((ObjectKind::Chain, MsgOp::New)),
            NFT_MSG_GETCHAIN => Some((ObjectKind::Chain, MsgOp::Get)),
            NFT_MSG_DELCHAIN => Some((ObjectKind::Chain, MsgOp::Del)),
            NFT_MSG_NEWRULE => Some((ObjectKind::Rule, MsgOp::New)),
            NFT_MSG_GETRULE => Some((ObjectKind::Rule, MsgOp::Get)),
            NFT_MSG_DELRULE => Some((ObjectKind::Rule, MsgOp::Del)),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Common behavior of the three descriptor types
pub trait Descriptor: Sized + fmt::Debug {
    const KIND: ObjectKind;

    /// Family to put in the nfgenmsg header
    fn family(&self) -> Family;

    /// Append the set fields as attributes
    fn encode(&self, attrs: &mut AttrWriter) -> Result<(), MessageError>;

    /// Decode a kernel-reported object
    ///
    /// Missing or unreadable attributes stay unset; whether the result is
    /// complete enough to use is decided by the caller.
    fn decode(family: u8, attrs: &Attributes) -> Result<Self, MessageError>;

    /// Filter predicate with `self` as the filter: the family (unless
    /// `Unspec`) and every set identity field must equal the object's.
    fn matches(&self, object: &Self) -> bool;

    /// Copy of the identity fields only, suitable for a delete request
    fn identity(&self) -> Self;

    /// Whether every identity field a kernel object must carry is set
    fn is_complete(&self) -> bool;
}

fn family_matches(filter: Option<Family>, object: Option<Family>) -> bool {
    match filter {
        None | Some(Family::Unspec) => true,
        Some(f) => object == Some(f),
    }
}

fn field_matches<T: PartialEq>(filter: &Option<T>, object: &Option<T>) -> bool {
    match filter {
        None => true,
        Some(f) => object.as_ref() == Some(f),
    }
}

fn decode_family(family: u8) -> Option<Family> {
    match Family::try_from(family) {
        Ok(Family::Unspec) | Err(_) => None,
        Ok(f) => Some(f),
    }
}

// ============================================================================
// TABLE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDescriptor {
    pub family: Option<Family>,
    pub name: Option<String>,
    pub flags: Option<u32>,
    pub use_count: Option<u32>,
    pub handle: Option<u64>,
}

impl Descriptor for TableDescriptor {
    const KIND: ObjectKind = ObjectKind::Table;

    fn family(&self) -> Family {
        self.family.unwrap_or_default()
    }

    fn encode(&self, attrs: &mut AttrWriter) -> Result<(), MessageError> {
        if let Some(name) = &self.name {
            attrs.put_str(NFTA_TABLE_NAME, name)?;
        }
        if let Some(flags) = self.flags {
            attrs.put_u32(NFTA_TABLE_FLAGS, flags)?;
        }
        Ok(())
    }

    fn decode(family: u8, attrs: &Attributes) -> Result<Self, MessageError> {
        Ok(Self {
            family: decode_family(family),
            name: attrs.get_str(NFTA_TABLE_NAME),
            flags: attrs.get_u32(NFTA_TABLE_FLAGS),
            use_count: attrs.get_u32(NFTA_TABLE_USE),
            handle: attrs.get_u64(NFTA_TABLE_HANDLE),
        })
    }

    fn matches(&self, object: &Self) -> bool {
        family_matches(self.family, object.family) && field_matches(&self.name, &object.name)
    }

    fn identity(&self) -> Self {
        Self {
            family: self.family,
            name: self.name.clone(),
            ..Self::default()
        }
    }

    fn is_complete(&self) -> bool {
        self.family.is_some() && self.name.is_some()
    }
}

/// Table descriptor for `h`: family always, name when the handle has one
pub fn build_table(h: &Handle) -> TableDescriptor {
    TableDescriptor {
        family: Some(h.family()),
        name: h.table_name().map(str::to_owned),
        ..TableDescriptor::default()
    }
}

// ============================================================================
// CHAIN
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainDescriptor {
    pub family: Option<Family>,
    pub table: Option<String>,
    pub name: Option<String>,
    pub hooknum: Option<u32>,
    pub priority: Option<i32>,
    pub chain_type: Option<String>,
    pub policy: Option<u32>,
    pub use_count: Option<u32>,
    pub handle: Option<u64>,
}

impl ChainDescriptor {
    /// Attach the chain to a hook point
    pub fn set_hook(&mut self, hooknum: u32, priority: i32) {
        self.hooknum = Some(hooknum);
        self.priority = Some(priority);
    }

    pub fn has_hook(&self) -> bool {
        self.hooknum.is_some() || self.priority.is_some()
    }
}

impl Descriptor for ChainDescriptor {
    const KIND: ObjectKind = ObjectKind::Chain;

    fn family(&self) -> Family {
        self.family.unwrap_or_default()
    }

    fn encode(&self, attrs: &mut AttrWriter) -> Result<(), MessageError> {
        if let Some(table) = &self.table {
            attrs.put_str(NFTA_CHAIN_TABLE, table)?;
        }
        if let Some(name) = &self.name {
            attrs.put_str(NFTA_CHAIN_NAME, name)?;
        }
        if self.has_hook() {
            let hook = attrs.begin_nested(NFTA_CHAIN_HOOK);
            attrs.put_u32(NFTA_HOOK_HOOKNUM, self.hooknum.unwrap_or(0))?;
            attrs.put_u32(NFTA_HOOK_PRIORITY, self.priority.unwrap_or(0) as u32)?;
            attrs.end_nested(hook)?;
        }
        if let Some(policy) = self.policy {
            attrs.put_u32(NFTA_CHAIN_POLICY, policy)?;
        }
        if let Some(chain_type) = &self.chain_type {
            attrs.put_str(NFTA_CHAIN_TYPE, chain_type)?;
        }
        Ok(())
    }

    fn decode(family: u8, attrs: &Attributes) -> Result<Self, MessageError> {
        let hook = attrs.get_nested(NFTA_CHAIN_HOOK)?;
        Ok(Self {
            family: decode_family(family),
            table: attrs.get_str(NFTA_CHAIN_TABLE),
            name: attrs.get_str(NFTA_CHAIN_NAME),
            hooknum: hook.as_ref().and_then(|h| h.get_u32(NFTA_HOOK_HOOKNUM)),
            priority: hook
                .as_ref()
                .and_then(|h| h.get_u32(NFTA_HOOK_PRIORITY))
                .map(|p| p as i32),
            chain_type: attrs.get_str(NFTA_CHAIN_TYPE),
            policy: attrs.get_u32(NFTA_CHAIN_POLICY),
            use_count: attrs.get_u32(NFTA_CHAIN_USE),
            handle: attrs.get_u64(NFTA_CHAIN_HANDLE),
        })
    }

    fn matches(&self, object: &Self) -> bool {
        family_matches(self.family, object.family)
            && field_matches(&self.table, &object.table)
            && field_matches(&self.name, &object.name)
    }

    fn identity(&self) -> Self {
        Self {
            family: self.family,
            table: self.table.clone(),
            name: self.name.clone(),
            ..Self::default()
        }
    }

    fn is_complete(&self) -> bool {
        self.family.is_some() && self.table.is_some() && self.name.is_some()
    }
}

/// Chain descriptor for `h`: family and table always, name only if set
pub fn build_chain(h: &Handle) -> ChainDescriptor {
    ChainDescriptor {
        family: Some(h.family()),
        table: h.table_name().map(str::to_owned),
        name: h.chain_name().map(str::to_owned),
        ..ChainDescriptor::default()
    }
}

// ============================================================================
// RULE
// ============================================================================

/// One element of `NFTA_RULE_EXPRESSIONS`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExprDescriptor {
    pub name: Option<String>,
    /// Raw `NFTA_EXPR_DATA` payload (itself nested attributes)
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDescriptor {
    pub family: Option<Family>,
    pub table: Option<String>,
    pub chain: Option<String>,
    pub handle: Option<u64>,
    /// Insert after this rule handle instead of appending
    pub position: Option<u64>,
    pub expressions: Option<Vec<ExprDescriptor>>,
}

impl Descriptor for RuleDescriptor {
    const KIND: ObjectKind = ObjectKind::Rule;

    fn family(&self) -> Family {
        self.family.unwrap_or_default()
    }

    fn encode(&self, attrs: &mut AttrWriter) -> Result<(), MessageError> {
        if let Some(table) = &self.table {
            attrs.put_str(NFTA_RULE_TABLE, table)?;
        }
        if let Some(chain) = &self.chain {
            attrs.put_str(NFTA_RULE_CHAIN, chain)?;
        }
        if let Some(handle) = self.handle {
            attrs.put_u64(NFTA_RULE_HANDLE, handle)?;
        }
        if let Some(position) = self.position {
            attrs.put_u64(NFTA_RULE_POSITION, position)?;
        }
        if let Some(exprs) = &self.expressions {
            let list = attrs.begin_nested(NFTA_RULE_EXPRESSIONS);
            for expr in exprs {
                let elem = attrs.begin_nested(NFTA_LIST_ELEM);
                if let Some(name) = &expr.name {
                    attrs.put_str(NFTA_EXPR_NAME, name)?;
                }
                if !expr.data.is_empty() {
                    attrs.put_bytes(NFTA_EXPR_DATA | NLA_F_NESTED, &expr.data)?;
                }
                attrs.end_nested(elem)?;
            }
            attrs.end_nested(list)?;
        }
        Ok(())
    }

    fn decode(family: u8, attrs: &Attributes) -> Result<Self, MessageError> {
        let expressions = match attrs.get_nested(NFTA_RULE_EXPRESSIONS)? {
            Some(list) => {
                let mut exprs = Vec::new();
                for elem in list.get_all(NFTA_LIST_ELEM) {
                    let elem = parse_attributes(elem)?;
                    exprs.push(ExprDescriptor {
                        name: elem.get_str(NFTA_EXPR_NAME),
                        data: elem.get(NFTA_EXPR_DATA).map(<[u8]>::to_vec).unwrap_or_default(),
                    });
                }
                Some(exprs)
            }
            None => None,
        };

        Ok(Self {
            family: decode_family(family),
            table: attrs.get_str(NFTA_RULE_TABLE),
            chain: attrs.get_str(NFTA_RULE_CHAIN),
            handle: attrs.get_u64(NFTA_RULE_HANDLE),
            position: attrs.get_u64(NFTA_RULE_POSITION),
            expressions,
        })
    }

    fn matches(&self, object: &Self) -> bool {
        family_matches(self.family, object.family)
            && field_matches(&self.table, &object.table)
            && field_matches(&self.chain, &object.chain)
            && field_matches(&self.handle, &object.handle)
    }

    fn identity(&self) -> Self {
        Self {
            family: self.family,
            table: self.table.clone(),
            chain: self.chain.clone(),
            handle: self.handle,
            ..Self::default()
        }
    }

    fn is_complete(&self) -> bool {
        self.family.is_some()
            && self.table.is_some()
            && self.chain.is_some()
            && self.handle.is_some_and(|h| h != 0)
    }
}

/// Rule descriptor for `h`: chain only if set, handle only if non-zero
pub fn build_rule(h: &Handle) -> RuleDescriptor {
    RuleDescriptor {
        family: Some(h.family()),
        table: h.table_name().map(str::to_owned),
        chain: h.chain_name().map(str::to_owned),
        handle: (h.rule_handle() != 0).then_some(h.rule_handle()),
        ..RuleDescriptor::default()
    }
}
