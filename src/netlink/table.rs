//! Table operations
//!
//! Tables are the top of the object tree: every chain and rule lives in
//! exactly one table, and a table is identified by its family and name
//! alone.
//!
//! # Educational Notes
//!
//! The kernel numbers families with `NFPROTO_*` values, so the same name
//! can exist once per family:
//!
//! ```text
//! ip  filter    <- (2, "filter")
//! ip6 filter    <- (10, "filter")
//! ```
//!
//! A request built from a handle with no name addresses every table of the
//! family; with `Family::Unspec` it addresses every table at all. Writes
//! always need the name, which the kernel enforces with `EINVAL`.
//!
//! Flushing a table here means flushing its rules. The chains and the
//! table itself survive, so the caller can repopulate them in place.

use tracing::debug;

use crate::codec::RuleCodec;
use crate::handle::Handle;
use crate::model::{Rule, Table};
use crate::netlink::channel::ChannelError;
use crate::netlink::descriptor::{Descriptor, MsgOp, TableDescriptor, build_table};
use crate::netlink::enumerate::{NetlinkCtx, ParseError, get_objects, list_objects};
use crate::netlink::rule::{RuleFlushReport, flush_rules, list_rules};
use crate::netlink::socket::Transport;
use crate::netlink::structures::{NLM_F_CREATE, NLM_F_EXCL};

/// Create the table `h` names
///
/// Fails with `EEXIST` if it already exists. Flags are taken from `table`
/// when given and non-zero.
pub fn add_table<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
    table: Option<&Table>,
) -> Result<(), ChannelError> {
    let mut desc = build_table(h);
    if let Some(table) = table.filter(|t| t.flags != 0) {
        desc.flags = Some(table.flags);
    }

    debug!(handle = %h, "adding table");
    ctx.chan
        .execute(MsgOp::New, &desc, NLM_F_CREATE | NLM_F_EXCL)
        .inspect_err(|e| ctx.msgs.io_error(None, format!("Could not add table: {}", e)))
}

/// Delete the table `h` names, with everything in it
///
/// The kernel refuses with `ENOENT` for an absent table and `EBUSY` while
/// something outside the table still refers to it.
pub fn delete_table<T: Transport>(ctx: &mut NetlinkCtx<'_, T>, h: &Handle) -> Result<(), ChannelError> {
    debug!(handle = %h, "deleting table");
    ctx.chan
        .execute(MsgOp::Del, &build_table(h), 0)
        .inspect_err(|e| ctx.msgs.io_error(None, format!("Could not delete table: {}", e)))
}

/// Every table matching `h`: its family (all families for
/// `Family::Unspec`), and its name when `h` carries one
pub fn list_tables<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
    out: &mut Vec<Table>,
) -> Result<(), ChannelError> {
    list_objects(ctx, &build_table(h), parse_table, out)
}

/// The single table `h` names, appended to `out`
pub fn get_table<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
    out: &mut Vec<Table>,
) -> Result<(), ChannelError> {
    get_objects(ctx, &build_table(h), parse_table, out)
}

/// Every rule in the table `h` names
pub fn list_table<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
    out: &mut Vec<Rule>,
) -> Result<(), ChannelError> {
    list_rules(ctx, h, out)
}

/// Delete every rule in the table `h` names; chains and the table stay
pub fn flush_table<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
) -> Result<RuleFlushReport, ChannelError> {
    flush_rules(ctx, h)
}

pub(crate) fn parse_table(desc: &TableDescriptor, _codec: &dyn RuleCodec) -> Result<Table, ParseError> {
    let (Some(family), Some(name)) = (desc.family, &desc.name) else {
        return Err(ParseError::Incomplete(TableDescriptor::KIND));
    };

    let mut table = Table::new(Handle::table(family, name.clone()));
    table.flags = desc.flags.unwrap_or(0);
    table.use_count = desc.use_count.unwrap_or(0);
    Ok(table)
}
