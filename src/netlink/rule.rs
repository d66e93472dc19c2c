//! Rule operations
//!
//! Rules are the only objects with a body: the expression list goes
//! through the context's `RuleCodec` on the way in and on the way out.
//! Add and delete errors are reported at the rule's source location so
//! the user sees which statement failed.

use tracing::debug;

use crate::codec::RuleCodec;
use crate::erec::Location;
use crate::handle::Handle;
use crate::model::Rule;
use crate::netlink::channel::ChannelError;
use crate::netlink::descriptor::{Descriptor, MsgOp, RuleDescriptor, build_rule};
use crate::netlink::enumerate::{
    FlushReport, NetlinkCtx, ParseError, flush_objects, get_objects, list_objects,
};
use crate::netlink::socket::Transport;
use crate::netlink::structures::{NLM_F_APPEND, NLM_F_CREATE, NLM_F_EXCL};

pub type RuleFlushReport = FlushReport<RuleDescriptor>;

/// Append `rule` to the chain `h` names
///
/// The body is encoded first; if that fails nothing is sent.
pub fn add_rule<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
    rule: &Rule,
) -> Result<(), ChannelError> {
    let mut desc = build_rule(h);
    if let Err(e) = ctx.codec.encode_rule(&mut desc, rule) {
        ctx.msgs
            .io_error(Some(&rule.location), format!("Could not add rule: {}", e));
        return Err(e.into());
    }

    debug!(handle = %h, exprs = rule.exprs.len(), "adding rule");
    ctx.chan
        .execute(MsgOp::New, &desc, NLM_F_CREATE | NLM_F_EXCL | NLM_F_APPEND)
        .inspect_err(|e| {
            ctx.msgs
                .io_error(Some(&rule.location), format!("Could not add rule: {}", e))
        })
}

/// Delete the rule `h` identifies
///
/// A failure is recorded at `location`, or the internal location.
pub fn delete_rule<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
    location: Option<&Location>,
) -> Result<(), ChannelError> {
    debug!(handle = %h, "deleting rule");
    ctx.chan
        .execute(MsgOp::Del, &build_rule(h), 0)
        .inspect_err(|e| ctx.msgs.io_error(location, format!("Could not delete rule: {}", e)))
}

/// Every rule matching `h`: family, then table, chain and handle when set
pub fn list_rules<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
    out: &mut Vec<Rule>,
) -> Result<(), ChannelError> {
    list_objects(ctx, &build_rule(h), parse_rule, out)
}

/// The rule(s) the kernel returns for `h`, appended to `out`
pub fn get_rule<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
    out: &mut Vec<Rule>,
) -> Result<(), ChannelError> {
    get_objects(ctx, &build_rule(h), parse_rule, out)
}

/// Delete every rule matching `h`, continuing past individual failures
pub fn flush_rules<T: Transport>(
    ctx: &mut NetlinkCtx<'_, T>,
    h: &Handle,
) -> Result<RuleFlushReport, ChannelError> {
    debug!(handle = %h, "flushing rules");
    flush_objects(ctx, &build_rule(h))
}

pub(crate) fn parse_rule(desc: &RuleDescriptor, codec: &dyn RuleCodec) -> Result<Rule, ParseError> {
    let (Some(family), Some(table), Some(chain), Some(handle)) = (
        desc.family,
        &desc.table,
        &desc.chain,
        desc.handle.filter(|h| *h != 0),
    ) else {
        return Err(ParseError::Incomplete(RuleDescriptor::KIND));
    };

    let exprs = codec
        .decode_rule(desc)
        .map_err(|source| ParseError::Codec {
            kind: RuleDescriptor::KIND,
            source,
        })?;
    Ok(Rule::new(
        Handle::rule(family, table.clone(), chain.clone(), handle),
        exprs,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawExprCodec;
    use crate::handle::Family;
    use crate::netlink::descriptor::ExprDescriptor;

    fn reported(handle: Option<u64>) -> RuleDescriptor {
        RuleDescriptor {
            family: Some(Family::Inet),
            table: Some("filter".into()),
            chain: Some("input".into()),
            handle,
            expressions: Some(vec![ExprDescriptor {
                name: Some("counter".into()),
                data: Vec::new(),
            }]),
            ..RuleDescriptor::default()
        }
    }

    #[test]
    fn test_parse_complete_rule() {
        let rule = parse_rule(&reported(Some(9)), &RawExprCodec).expect("complete rule");
        assert_eq!(rule.handle, Handle::rule(Family::Inet, "filter", "input", 9));
        assert_eq!(rule.exprs.len(), 1);
        assert_eq!(rule.exprs[0].name, "counter");
    }

    #[test]
    fn test_zero_handle_is_incomplete() {
        for handle in [None, Some(0)] {
            let err = parse_rule(&reported(handle), &RawExprCodec).unwrap_err();
            assert_eq!(err.to_string(), "Incomplete rule received");
        }
    }

    #[test]
    fn test_decode_failure_is_reported() {
        let mut desc = reported(Some(4));
        desc.expressions = Some(vec![ExprDescriptor::default()]);
        let err = parse_rule(&desc, &RawExprCodec).unwrap_err();
        assert!(matches!(err, ParseError::Codec { .. }));
        assert!(err.to_string().starts_with("Could not decode rule"));
    }
}
