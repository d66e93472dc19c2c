//! Chain operations
//!
//! A chain is identified by family, table and name. There are two sorts:
//!
//! ```text
//! base chain      NFTA_CHAIN_HOOK { hooknum, priority }, type, policy
//! ordinary chain  no hook; only reachable by jump/goto from a rule
//! ```
//!
//! The hook is sent only for base chains. An ordinary chain with a zero
//! hook attached would be registered on `NF_INET_PRE_ROUTING` at priority
//! 0, which is a different object altogether.
//!
//! # Priorities
//!
//! Priorities are signed (`-150` is mangle, `100` is srcnat) but travel as
//! a big-endian `u32`, so they are cast on both sides of the wire.

use tracing::debug;

use crate::codec::RuleCodec;
use crate::handle::Handle;
use crate::model::{Chain, Rule};
use crate::netlink::channel::ChannelError;
use crate::netlink::descriptor::{ChainDescriptor, Descriptor, MsgOp, build_chain};
use crate::netlink::enumerate::{NetlinkCtx, ParseError, get_objects, list_objects};
use crate::netlink::rule::{RuleFlushReport, flush_rules, list_rules};
use crate::netlink::socket::Transport;
use crate::netlink::structures::{NLM_F_CREATE, NLM_F_EXCL};

/// Create the chain `h` names
///
/// With a `chain` that has a hook (non-zero hook number or priority) a
/// base chain is created, carrying its type and policy when set. Otherwise
/// the chain is an ordinary one and no hook attributes are sent.
pub fn add_chain<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
    chain: Option<&Chain>,
) -> Result<(), ChannelError> {
    let mut desc = build_chain(h);
    if let Some(chain) = chain.filter(|c| c.has_hook()) {
        desc.set_hook(chain.hooknum, chain.priority);
        desc.chain_type = chain.chain_type.clone();
        desc.policy = chain.policy;
    }

    debug!(handle = %h, hooked = desc.has_hook(), "adding chain");
    ctx.chan
        .execute(MsgOp::New, &desc, NLM_F_CREATE | NLM_F_EXCL)
        .inspect_err(|e| ctx.msgs.io_error(None, format!("Could not add chain: {}", e)))
}

/// Delete the chain `h` names
///
/// The kernel answers `EBUSY` while the chain still holds rules or is the
/// target of a jump; flush it first.
pub fn delete_chain<T: Transport>(ctx: &mut NetlinkCtx<'_, T>, h: &Handle) -> Result<(), ChannelError> {
    debug!(handle = %h, "deleting chain");
    ctx.chan
        .execute(MsgOp::Del, &build_chain(h), 0)
        .inspect_err(|e| ctx.msgs.io_error(None, format!("Could not delete chain: {}", e)))
}

/// Every chain matching `h` (family, plus table and name when set)
pub fn list_chains<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
    out: &mut Vec<Chain>,
) -> Result<(), ChannelError> {
    list_objects(ctx, &build_chain(h), parse_chain, out)
}

/// The single chain `h` names, appended to `out`
pub fn get_chain<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
    out: &mut Vec<Chain>,
) -> Result<(), ChannelError> {
    get_objects(ctx, &build_chain(h), parse_chain, out)
}

/// Every rule in the chain `h` names
pub fn list_chain<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
    out: &mut Vec<Rule>,
) -> Result<(), ChannelError> {
    list_rules(ctx, h, out)
}

/// Delete every rule in the chain `h` names; the chain itself stays
pub fn flush_chain<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
) -> Result<RuleFlushReport, ChannelError> {
    flush_rules(ctx, h)
}

pub(crate) fn parse_chain(desc: &ChainDescriptor, _codec: &dyn RuleCodec) -> Result<Chain, ParseError> {
    let (Some(family), Some(table), Some(name)) = (desc.family, &desc.table, &desc.name) else {
        return Err(ParseError::Incomplete(ChainDescriptor::KIND));
    };

    let mut chain = Chain::new(Handle::chain(family, table.clone(), name.clone()));
    chain.hooknum = desc.hooknum.unwrap_or(0);
    chain.priority = desc.priority.unwrap_or(0);
    chain.chain_type = desc.chain_type.clone();
    chain.policy = desc.policy;
    chain.use_count = desc.use_count.unwrap_or(0);
    Ok(chain)
}
