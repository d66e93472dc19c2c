//! Enumeration, filtering and flush
//!
//! Everything here is generic over the descriptor kind. A listing is a
//! pipeline: snapshot, select the objects the request descriptor matches,
//! parse each into its model type, append to the caller's vector. Only the
//! snapshot talks to the kernel; selection and parsing are pure.
//!
//! # Reading Paths
//!
//! ```text
//! list_objects:  dump (all families) -> select(filter) -> parse -> out
//! get_objects:   query(identity)     -> drain replies   -> parse -> out
//! flush_objects: dump (all families) -> select(filter) -> delete each
//! ```
//!
//! The kernel answers a dump with every object of the kind, so a listing
//! scoped to one table still transfers the whole ruleset. Selection is a
//! plain `Descriptor::matches` call per object.
//!
//! # Failure Accounting
//!
//! Every failure leaves exactly one record in the caller's
//! `DiagnosticsQueue`:
//!
//! - a snapshot or drain that fails aborts the call and records
//!   "Could not receive ... from kernel"
//! - an object missing an identity attribute records
//!   "Incomplete <kind> received" and is skipped; the call still succeeds
//! - a failed delete during a flush records "Could not delete <kind>"
//!   and the flush moves on to the next object

use thiserror::Error;
use tracing::debug;

use crate::codec::{CodecError, RuleCodec};
use crate::erec::DiagnosticsQueue;
use crate::netlink::channel::{Channel, ChannelError};
use crate::netlink::descriptor::{Descriptor, MsgOp, ObjectKind};
use crate::netlink::socket::Transport;

/// Everything an operation needs: the channel, where to record errors,
/// and how to translate rule bodies
pub struct NetlinkCtx<'a, T: Transport> {
    pub chan: &'a mut Channel<T>,
    pub msgs: &'a mut DiagnosticsQueue,
    pub codec: &'a dyn RuleCodec,
}

impl<'a, T: Transport> NetlinkCtx<'a, T> {
    pub fn new(chan: &'a mut Channel<T>, msgs: &'a mut DiagnosticsQueue, codec: &'a dyn RuleCodec) -> Self {
        Self { chan, msgs, codec }
    }
}

/// Why a kernel-reported object was not turned into a model value
#[derive(Debug, Error)]
pub enum ParseError {
    /// A required identity attribute was absent
    #[error("Incomplete {0} received")]
    Incomplete(ObjectKind),

    #[error("Could not decode {kind}: {source}")]
    Codec {
        kind: ObjectKind,
        #[source]
        source: CodecError,
    },
}

/// Descriptor to model conversion, including the completeness check
pub type Parser<D, E> = fn(&D, &dyn RuleCodec) -> Result<E, ParseError>;

/// Parse one object; on failure record it and move on
fn accept<D, E>(
    object: &D,
    parse: Parser<D, E>,
    codec: &dyn RuleCodec,
    msgs: &mut DiagnosticsQueue,
    out: &mut Vec<E>,
) {
    match parse(object, codec) {
        Ok(entity) => out.push(entity),
        Err(e) => msgs.io_error(None, e.to_string()),
    }
}

/// Snapshot every object of kind `D`, keep those `filter` matches
///
/// # Errors
///
/// Fails only when the snapshot cannot be obtained; `out` is then
/// unchanged and one error record has been queued.
pub fn list_objects<T: Transport, D: Descriptor, E>(
    ctx: &mut NetlinkCtx<'_, T>,
    filter: &D,
    parse: Parser<D, E>,
    out: &mut Vec<E>,
) -> Result<(), ChannelError> {
    let snapshot = match ctx.chan.dump::<D>() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            ctx.msgs
                .io_error(None, format!("Could not receive {}s from kernel: {}", D::KIND, e));
            return Err(e);
        }
    };

    let before = out.len();
    for object in snapshot.select(filter) {
        accept(object, parse, ctx.codec, ctx.msgs, out);
    }
    debug!(
        kind = %D::KIND,
        total = snapshot.len(),
        kept = out.len() - before,
        "listed objects"
    );
    Ok(())
}

/// Query one object by identity and parse every reply
///
/// # Errors
///
/// A failure while draining aborts the call with one error record; objects
/// parsed before the failure stay in `out`.
pub fn get_objects<T: Transport, D: Descriptor, E>(
    ctx: &mut NetlinkCtx<'_, T>,
    desc: &D,
    parse: Parser<D, E>,
    out: &mut Vec<E>,
) -> Result<(), ChannelError> {
    let result = drain_into(ctx.chan, ctx.msgs, ctx.codec, desc, parse, out);
    if let Err(e) = &result {
        ctx.msgs
            .io_error(None, format!("Could not receive {} from kernel: {}", D::KIND, e));
    }
    result
}

fn drain_into<T: Transport, D: Descriptor, E>(
    chan: &mut Channel<T>,
    msgs: &mut DiagnosticsQueue,
    codec: &dyn RuleCodec,
    desc: &D,
    parse: Parser<D, E>,
    out: &mut Vec<E>,
) -> Result<(), ChannelError> {
    for reply in chan.query(desc)? {
        accept(&reply?, parse, codec, msgs, out);
    }
    Ok(())
}

// ============================================================================
// FLUSH
// ============================================================================

/// Result of deleting one object during a flush
#[derive(Debug)]
pub struct FlushOutcome<D> {
    /// Identity the delete was sent for
    pub target: D,
    pub result: Result<(), ChannelError>,
}

/// Per-object results of a flush, in snapshot order
#[derive(Debug)]
pub struct FlushReport<D> {
    pub outcomes: Vec<FlushOutcome<D>>,
}

impl<D> Default for FlushReport<D> {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }
}

impl<D> FlushReport<D> {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    pub fn succeeded(&self) -> usize {
        self.attempted() - self.failed()
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &FlushOutcome<D>> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

/// Delete every object `filter` matches, one request each
///
/// Best effort: a failed delete is recorded and the next object is tried.
/// Objects that fail `Descriptor::is_complete` are recorded as incomplete
/// and never sent; they do not appear in the report.
///
/// # Errors
///
/// Only when the snapshot itself cannot be obtained.
pub fn flush_objects<T: Transport, D: Descriptor>(
    ctx: &mut NetlinkCtx<'_, T>,
    filter: &D,
) -> Result<FlushReport<D>, ChannelError> {
    let snapshot = match ctx.chan.dump::<D>() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            ctx.msgs
                .io_error(None, format!("Could not receive {}s from kernel: {}", D::KIND, e));
            return Err(e);
        }
    };

    let report = snapshot
        .select(filter)
        .fold(FlushReport::default(), |mut report, object| {
            if !object.is_complete() {
                // an identity with fields missing would widen the delete
                ctx.msgs.io_error(None, ParseError::Incomplete(D::KIND).to_string());
                return report;
            }
            debug!(kind = %D::KIND, ?object, "flushing");
            let target = object.identity();
            let result = ctx.chan.execute(MsgOp::Del, &target, 0);
            if let Err(e) = &result {
                ctx.msgs
                    .io_error(None, format!("Could not delete {}: {}", D::KIND, e));
            }
            report.outcomes.push(FlushOutcome { target, result });
            report
        });

    debug!(
        kind = %D::KIND,
        attempted = report.attempted(),
        failed = report.failed(),
        "flush finished"
    );
    Ok(report)
}
