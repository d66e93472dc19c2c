//! The control channel
//!
//! One `Channel` owns the connection to the nf_tables control plane. It
//! is an explicit resource handle: opened once at the top of the program,
//! passed by `&mut` into every operation, closed (or dropped) once.
//!
//! Three request shapes go through it:
//!
//! * `execute` - a single add/delete, framed in a batch, waits for the ACK
//! * `dump` - a full snapshot of one object kind (`NLM_F_DUMP`)
//! * `query` - a single-object GET whose replies are drained through the
//!   `Drain` iterator until the ACK, `NLMSG_DONE` or an error

use std::collections::VecDeque;
use std::io;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::codec::CodecError;
use crate::config::ChannelConfig;
use crate::handle::Family;
use crate::netlink::descriptor::{Descriptor, MsgOp, ObjectKind};
use crate::netlink::message::{
    AttrWriter, MessageError, ParsedMessage, build_batch, build_nft_message,
    parse_netlink_messages,
};
#[cfg(target_os = "linux")]
use crate::netlink::socket::NetlinkSocket;
use crate::netlink::socket::{SocketError, Transport};
use crate::netlink::structures::*;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0}")]
    Socket(#[from] SocketError),

    #[error("{0}")]
    Message(#[from] MessageError),

    #[error("{0}")]
    Codec(#[from] CodecError),

    /// Negative result from the kernel (positive errno)
    #[error("{}", errno_text(.0))]
    Kernel(i32),

    #[error("a control channel is already open in this process")]
    AlreadyOpen,

    #[error("timed out waiting for the kernel")]
    Timeout,

    #[error("response exceeds {0} bytes")]
    ResponseTooLarge(usize),

    #[error("dump interrupted by a concurrent ruleset change")]
    DumpInterrupted,

    #[error("no reply after {0} datagrams")]
    DrainExhausted(usize),
}

impl ChannelError {
    pub fn errno(&self) -> Option<i32> {
        match self {
            ChannelError::Kernel(errno) => Some(*errno),
            _ => None,
        }
    }
}

fn errno_text(errno: &i32) -> String {
    let text = io::Error::from_raw_os_error(*errno).to_string();
    // Drop the " (os error N)" suffix std appends.
    match text.rfind(" (os error") {
        Some(idx) => text[..idx].to_string(),
        None => text,
    }
}

// ============================================================================
// SINGLETON GUARD
// ============================================================================

static CHANNEL_OPEN: AtomicBool = AtomicBool::new(false);

/// Held by the one kernel-backed channel; clears the flag on drop
#[derive(Debug)]
struct OpenGuard;

impl OpenGuard {
    fn acquire() -> Result<Self, ChannelError> {
        CHANNEL_OPEN
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| OpenGuard)
            .map_err(|_| ChannelError::AlreadyOpen)
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        CHANNEL_OPEN.store(false, Ordering::Release);
    }
}

// ============================================================================
// CHANNEL
// ============================================================================

pub struct Channel<T: Transport> {
    transport: T,
    config: ChannelConfig,
    seq: u32,
    buffer: Vec<u8>,
    _guard: Option<OpenGuard>,
}

#[cfg(target_os = "linux")]
impl Channel<NetlinkSocket> {
    /// Open the process-wide channel to the kernel
    ///
    /// # Errors
    ///
    /// `ChannelError::AlreadyOpen` if another channel is open, or the
    /// socket error. There is no fallback channel: callers treat this as
    /// fatal.
    pub fn open(config: ChannelConfig) -> Result<Self, ChannelError> {
        let guard = OpenGuard::acquire()?;
        let socket = NetlinkSocket::new(config.recv_buffer_size, config.recv_timeout)?;
        debug!(
            rcvbuf = config.recv_buffer_size,
            timeout = ?config.recv_timeout,
            "opened nf_tables channel"
        );
        let mut chan = Self::with_transport(socket, config);
        chan._guard = Some(guard);
        Ok(chan)
    }
}

impl<T: Transport> Channel<T> {
    /// Channel over an arbitrary transport; not subject to the
    /// one-open-channel rule.
    pub fn with_transport(transport: T, config: ChannelConfig) -> Self {
        let buffer = vec![0u8; config.recv_buffer_size.max(NlMsgHdr::SIZE)];
        Self {
            transport,
            config,
            seq: 0,
            buffer,
            _guard: None,
        }
    }

    /// Release the connection
    pub fn close(self) {
        debug!("closing nf_tables channel");
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Add or delete one object and wait for the kernel's verdict
    ///
    /// # Errors
    ///
    /// `ChannelError::Kernel` with the errno for a rejected request
    /// (`EEXIST`, `ENOENT`, ...), or a transport error.
    /// `ChannelError::Message` when an attribute does not fit its 16-bit
    /// length; nothing is sent in that case.
    pub fn execute<D: Descriptor>(&mut self, op: MsgOp, desc: &D, flags: u16) -> Result<(), ChannelError> {
        let mut attrs = AttrWriter::new();
        desc.encode(&mut attrs)?;

        // begin marker, message, end marker
        self.next_seq();
        let seq = self.next_seq();
        self.next_seq();

        let msg = build_nft_message(
            D::KIND.msg_type(op),
            flags | NLM_F_ACK,
            desc.family().as_u8(),
            seq,
            attrs.as_bytes(),
        );
        trace!(kind = %D::KIND, ?op, seq, ?desc, "sending request");
        self.transport.send(&build_batch(seq, &msg))?;
        self.wait_ack(seq)
    }

    fn wait_ack(&mut self, seq: u32) -> Result<(), ChannelError> {
        let mut received = 0;
        for _ in 0..self.config.max_drain_datagrams {
            for msg in self.recv_messages(&mut received)? {
                if msg.seq() != seq {
                    trace!(seq = msg.seq(), expected = seq, "skipping stale reply");
                    continue;
                }
                match msg {
                    ParsedMessage::Error { errno: 0, .. } => return Ok(()),
                    ParsedMessage::Error { errno, .. } => return Err(ChannelError::Kernel(errno)),
                    other => trace!(?other, "ignoring reply while waiting for ack"),
                }
            }
        }
        Err(ChannelError::DrainExhausted(self.config.max_drain_datagrams))
    }

    /// Fetch every object of kind `D` from the kernel, in kernel order
    ///
    /// The dump is requested for `Family::Unspec`, i.e. all families;
    /// filtering is the caller's job.
    pub fn dump<D: Descriptor>(&mut self) -> Result<Snapshot<D>, ChannelError> {
        let seq = self.next_seq();
        let msg = build_nft_message(
            D::KIND.msg_type(MsgOp::Get),
            NLM_F_DUMP,
            Family::Unspec.as_u8(),
            seq,
            &[],
        );
        trace!(kind = %D::KIND, seq, "requesting dump");
        self.transport.send(&msg)?;

        let mut objects = Vec::new();
        let mut received = 0;
        loop {
            for msg in self.recv_messages(&mut received)? {
                if msg.seq() != seq {
                    trace!(seq = msg.seq(), expected = seq, "skipping stale reply");
                    continue;
                }
                match msg {
                    ParsedMessage::Object {
                        header,
                        family,
                        attributes,
                    } => {
                        if header.nlmsg_flags & NLM_F_DUMP_INTR != 0 {
                            return Err(ChannelError::DumpInterrupted);
                        }
                        if !is_kind(&header, D::KIND) {
                            warn!(nlmsg_type = header.nlmsg_type, "unexpected object in dump");
                            continue;
                        }
                        objects.push(D::decode(family, &attributes)?);
                    }
                    ParsedMessage::Done { .. } => {
                        debug!(kind = %D::KIND, count = objects.len(), "dump complete");
                        return Ok(Snapshot { objects });
                    }
                    ParsedMessage::Error { errno: 0, .. } => {}
                    ParsedMessage::Error { errno, .. } => return Err(ChannelError::Kernel(errno)),
                }
            }
        }
    }

    /// Send a GET for one object and return the reply drain
    ///
    /// Nothing is received until the `Drain` is iterated.
    pub fn query<D: Descriptor>(&mut self, desc: &D) -> Result<Drain<'_, T, D>, ChannelError> {
        let mut attrs = AttrWriter::new();
        desc.encode(&mut attrs)?;
        let seq = self.next_seq();
        let msg = build_nft_message(
            D::KIND.msg_type(MsgOp::Get),
            NLM_F_ACK,
            desc.family().as_u8(),
            seq,
            attrs.as_bytes(),
        );
        trace!(kind = %D::KIND, seq, ?desc, "sending query");
        self.transport.send(&msg)?;

        Ok(Drain {
            chan: self,
            seq,
            pending: VecDeque::new(),
            datagrams: 0,
            received: 0,
            finished: false,
            _kind: PhantomData,
        })
    }

    /// Receive one datagram and parse it
    ///
    /// `received` accumulates the bytes of the current response and is
    /// checked against `max_response_bytes`.
    fn recv_messages(&mut self, received: &mut usize) -> Result<Vec<ParsedMessage>, ChannelError> {
        let len = match self.transport.recv(&mut self.buffer) {
            Ok(len) => len,
            Err(e) if e.is_timeout() => return Err(ChannelError::Timeout),
            Err(e) => return Err(e.into()),
        };
        if len == self.buffer.len() {
            warn!(len, "datagram filled the receive buffer and may be truncated");
        }

        *received += len;
        if *received > self.config.max_response_bytes {
            return Err(ChannelError::ResponseTooLarge(self.config.max_response_bytes));
        }

        Ok(parse_netlink_messages(&self.buffer[..len])?)
    }
}

fn is_kind(header: &NlMsgHdr, kind: ObjectKind) -> bool {
    let (subsys, msg) = split_msg_type(header.nlmsg_type);
    subsys == NFNL_SUBSYS_NFTABLES
        && ObjectKind::from_msg_type(msg).is_some_and(|(k, _)| k == kind)
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Point-in-time copy of every kernel object of one kind
///
/// May be stale relative to changes made outside this process after the
/// dump completed.
#[derive(Debug)]
pub struct Snapshot<D: Descriptor> {
    objects: Vec<D>,
}

impl<D: Descriptor> Snapshot<D> {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &D> {
        self.objects.iter()
    }

    /// Objects matching `filter`, in snapshot order
    pub fn select<'a>(&'a self, filter: &'a D) -> impl Iterator<Item = &'a D> + 'a {
        self.objects.iter().filter(move |object| filter.matches(object))
    }
}

impl<D: Descriptor> Drop for Snapshot<D> {
    fn drop(&mut self) {
        trace!(kind = %D::KIND, count = self.objects.len(), "releasing snapshot");
    }
}

// ============================================================================
// QUERY DRAIN
// ============================================================================

/// Replies to one query, yielded as decoded objects
///
/// Ends after the ACK or `NLMSG_DONE`. A kernel error, a transport error
/// (including the receive deadline) or running out of the datagram budget
/// is yielded once as `Err` and ends the iteration.
pub struct Drain<'c, T: Transport, D: Descriptor> {
    chan: &'c mut Channel<T>,
    seq: u32,
    pending: VecDeque<ParsedMessage>,
    datagrams: usize,
    received: usize,
    finished: bool,
    _kind: PhantomData<D>,
}

impl<T: Transport, D: Descriptor> Drain<'_, T, D> {
    fn fail(&mut self, err: ChannelError) -> Option<Result<D, ChannelError>> {
        self.finished = true;
        Some(Err(err))
    }
}

impl<T: Transport, D: Descriptor> Iterator for Drain<'_, T, D> {
    type Item = Result<D, ChannelError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if let Some(msg) = self.pending.pop_front() {
                if msg.seq() != self.seq {
                    trace!(seq = msg.seq(), expected = self.seq, "skipping stale reply");
                    continue;
                }
                match msg {
                    ParsedMessage::Object {
                        header,
                        family,
                        attributes,
                    } => {
                        if !is_kind(&header, D::KIND) {
                            warn!(nlmsg_type = header.nlmsg_type, "unexpected object in reply");
                            continue;
                        }
                        return match D::decode(family, &attributes) {
                            Ok(object) => Some(Ok(object)),
                            Err(e) => self.fail(e.into()),
                        };
                    }
                    ParsedMessage::Done { .. } | ParsedMessage::Error { errno: 0, .. } => {
                        self.finished = true;
                    }
                    ParsedMessage::Error { errno, .. } => {
                        return self.fail(ChannelError::Kernel(errno));
                    }
                }
                continue;
            }

            let budget = self.chan.config.max_drain_datagrams;
            if self.datagrams >= budget {
                return self.fail(ChannelError::DrainExhausted(budget));
            }
            self.datagrams += 1;
            match self.chan.recv_messages(&mut self.received) {
                Ok(msgs) => self.pending.extend(msgs),
                Err(e) => return self.fail(e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_error_text() {
        let err = ChannelError::Kernel(libc::EEXIST);
        assert_eq!(err.to_string(), "File exists");
        assert_eq!(err.errno(), Some(libc::EEXIST));
        assert_eq!(ChannelError::Timeout.errno(), None);
    }

    #[test]
    fn test_open_guard_is_exclusive() {
        let first = OpenGuard::acquire().expect("first guard");
        assert!(matches!(OpenGuard::acquire(), Err(ChannelError::AlreadyOpen)));
        drop(first);
        let again = OpenGuard::acquire().expect("guard after release");
        drop(again);
    }
}
