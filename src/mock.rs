// ============================================================================
// IN-MEMORY NF_TABLES CONTROL PLANE (tests only)
// ============================================================================
// `MockKernel` implements `Transport` and answers requests the way the
// kernel does: batched writes get an ACK or an errno, dumps return one
// object per datagram followed by NLMSG_DONE, single-object GETs return
// the object followed by an ACK.
//
// Objects are stored as descriptors, so tests can plant incomplete ones
// directly. Failure knobs are public fields.

use std::collections::VecDeque;
use std::io;

use crate::netlink::descriptor::{
    ChainDescriptor, Descriptor, MsgOp, ObjectKind, RuleDescriptor, TableDescriptor,
};
use crate::netlink::message::{AttrWriter, Attributes, ParsedMessage, parse_netlink_messages};
use crate::netlink::socket::{SocketError, Transport};
use crate::netlink::structures::*;

#[derive(Debug, Default)]
pub struct MockKernel {
    pub tables: Vec<TableDescriptor>,
    pub chains: Vec<ChainDescriptor>,
    pub rules: Vec<RuleDescriptor>,

    /// Every nf_tables request received, in order
    pub requests: Vec<(ObjectKind, MsgOp)>,

    /// Rule handle whose delete is refused, and with which errno
    pub fail_rule_delete: Option<(u64, i32)>,
    /// Errno every dump is answered with
    pub fail_dumps: Option<i32>,
    /// Answer single-object queries without the trailing ACK
    pub withhold_ack: bool,
    /// Precede each query answer with an object carrying no attributes
    pub empty_reply_first: bool,

    last_handle: u64,
    pending: VecDeque<Vec<u8>>,
}

impl MockKernel {
    pub fn count(&self, kind: ObjectKind, op: MsgOp) -> usize {
        self.requests.iter().filter(|r| **r == (kind, op)).count()
    }

    /// Queue a raw datagram ahead of any reply
    pub fn push_datagram(&mut self, datagram: Vec<u8>) {
        self.pending.push_back(datagram);
    }

    pub fn rule_handles(&self) -> Vec<u64> {
        self.rules.iter().filter_map(|r| r.handle).collect()
    }

    fn handle_request(&mut self, header: NlMsgHdr, family: u8, attrs: &Attributes) {
        let (_, msg) = split_msg_type(header.nlmsg_type);
        let Some((kind, op)) = ObjectKind::from_msg_type(msg) else {
            self.pending.push_back(error_message(&header, libc::EOPNOTSUPP));
            return;
        };
        self.requests.push((kind, op));

        if op == MsgOp::Get {
            if header.nlmsg_flags & NLM_F_DUMP != 0 {
                self.dump(kind, &header);
            } else {
                self.query(kind, &header, family, attrs);
            }
            return;
        }

        let result = match (kind, op) {
            (ObjectKind::Table, MsgOp::New) => decode(family, attrs).and_then(|d| self.new_table(d)),
            (ObjectKind::Table, _) => decode(family, attrs).and_then(|d| self.del_table(&d)),
            (ObjectKind::Chain, MsgOp::New) => decode(family, attrs).and_then(|d| self.new_chain(d)),
            (ObjectKind::Chain, _) => decode(family, attrs).and_then(|d| self.del_chain(&d)),
            (ObjectKind::Rule, MsgOp::New) => decode(family, attrs).and_then(|d| self.new_rule(d)),
            (ObjectKind::Rule, _) => decode(family, attrs).and_then(|d| self.del_rule(&d)),
        };

        match result {
            Ok(()) if header.nlmsg_flags & NLM_F_ACK != 0 => {
                self.pending.push_back(error_message(&header, 0));
            }
            Ok(()) => {}
            Err(errno) => self.pending.push_back(error_message(&header, errno)),
        }
    }

    // === WRITES ===

    fn new_table(&mut self, desc: TableDescriptor) -> Result<(), i32> {
        if desc.name.is_none() {
            return Err(libc::EINVAL);
        }
        if self.tables.iter().any(|t| desc.matches(t)) {
            return Err(libc::EEXIST);
        }
        self.last_handle += 1;
        self.tables.push(TableDescriptor {
            handle: Some(self.last_handle),
            use_count: Some(0),
            ..desc
        });
        Ok(())
    }

    fn del_table(&mut self, desc: &TableDescriptor) -> Result<(), i32> {
        let Some(name) = &desc.name else {
            return Err(libc::EINVAL);
        };
        let idx = self.tables.iter().position(|t| desc.matches(t)).ok_or(libc::ENOENT)?;
        self.tables.remove(idx);
        self.chains
            .retain(|c| !(c.family == desc.family && c.table.as_ref() == Some(name)));
        self.rules
            .retain(|r| !(r.family == desc.family && r.table.as_ref() == Some(name)));
        Ok(())
    }

    fn new_chain(&mut self, desc: ChainDescriptor) -> Result<(), i32> {
        if desc.table.is_none() || desc.name.is_none() {
            return Err(libc::EINVAL);
        }
        let table = TableDescriptor {
            family: desc.family,
            name: desc.table.clone(),
            ..TableDescriptor::default()
        };
        if !self.tables.iter().any(|t| table.matches(t)) {
            return Err(libc::ENOENT);
        }
        if self.chains.iter().any(|c| desc.matches(c)) {
            return Err(libc::EEXIST);
        }
        self.last_handle += 1;
        self.chains.push(ChainDescriptor {
            handle: Some(self.last_handle),
            use_count: Some(0),
            ..desc
        });
        Ok(())
    }

    fn del_chain(&mut self, desc: &ChainDescriptor) -> Result<(), i32> {
        if desc.table.is_none() || desc.name.is_none() {
            return Err(libc::EINVAL);
        }
        let idx = self.chains.iter().position(|c| desc.matches(c)).ok_or(libc::ENOENT)?;
        let in_chain = RuleDescriptor {
            family: desc.family,
            table: desc.table.clone(),
            chain: desc.name.clone(),
            ..RuleDescriptor::default()
        };
        if self.rules.iter().any(|r| in_chain.matches(r)) {
            return Err(libc::EBUSY);
        }
        self.chains.remove(idx);
        Ok(())
    }

    fn new_rule(&mut self, desc: RuleDescriptor) -> Result<(), i32> {
        if desc.table.is_none() || desc.chain.is_none() {
            return Err(libc::EINVAL);
        }
        let chain = ChainDescriptor {
            family: desc.family,
            table: desc.table.clone(),
            name: desc.chain.clone(),
            ..ChainDescriptor::default()
        };
        if !self.chains.iter().any(|c| chain.matches(c)) {
            return Err(libc::ENOENT);
        }
        self.last_handle += 1;
        self.rules.push(RuleDescriptor {
            handle: Some(self.last_handle),
            position: None,
            ..desc
        });
        Ok(())
    }

    fn del_rule(&mut self, desc: &RuleDescriptor) -> Result<(), i32> {
        if desc.table.is_none() || desc.chain.is_none() {
            return Err(libc::EINVAL);
        }
        match (desc.handle, self.fail_rule_delete) {
            (Some(handle), Some((failing, errno))) if handle == failing => return Err(errno),
            (Some(_), _) => {
                let idx = self.rules.iter().position(|r| desc.matches(r)).ok_or(libc::ENOENT)?;
                self.rules.remove(idx);
            }
            // No handle: the whole chain is flushed
            (None, _) => self.rules.retain(|r| !desc.matches(r)),
        }
        Ok(())
    }

    // === READS ===

    fn dump(&mut self, kind: ObjectKind, request: &NlMsgHdr) {
        if let Some(errno) = self.fail_dumps {
            self.pending.push_back(error_message(request, errno));
            return;
        }

        let seq = request.nlmsg_seq;
        let datagrams: Vec<Vec<u8>> = match kind {
            ObjectKind::Table => self.tables.iter().map(|t| object_message(t, seq, NLM_F_MULTI)).collect(),
            ObjectKind::Chain => self.chains.iter().map(|c| object_message(c, seq, NLM_F_MULTI)).collect(),
            ObjectKind::Rule => self.rules.iter().map(|r| object_message(r, seq, NLM_F_MULTI)).collect(),
        };
        self.pending.extend(datagrams);
        self.pending.push_back(done_message(seq));
    }

    fn query(&mut self, kind: ObjectKind, request: &NlMsgHdr, family: u8, attrs: &Attributes) {
        let seq = request.nlmsg_seq;
        let found = match kind {
            ObjectKind::Table => find(&self.tables, family, attrs, |d: &TableDescriptor| d.name.is_some()),
            ObjectKind::Chain => find(&self.chains, family, attrs, |d: &ChainDescriptor| {
                d.table.is_some() && d.name.is_some()
            }),
            ObjectKind::Rule => find(&self.rules, family, attrs, |d: &RuleDescriptor| d.handle.is_some()),
        }
        .map(|object| object_message_raw(kind, &object, seq));

        match found {
            Ok(datagram) => {
                if self.empty_reply_first {
                    let empty = Encoded {
                        family,
                        attrs: Vec::new(),
                    };
                    self.pending.push_back(object_message_raw(kind, &empty, seq));
                }
                self.pending.push_back(datagram);
                if !self.withhold_ack {
                    self.pending.push_back(error_message(request, 0));
                }
            }
            Err(errno) => self.pending.push_back(error_message(request, errno)),
        }
    }
}

impl Transport for MockKernel {
    fn send(&mut self, data: &[u8]) -> Result<(), SocketError> {
        let messages = parse_netlink_messages(data)
            .map_err(|e| SocketError::new(e.to_string(), io::ErrorKind::InvalidInput))?;
        for msg in messages {
            if let ParsedMessage::Object {
                header,
                family,
                attributes,
            } = msg
            {
                self.handle_request(header, family, &attributes);
            }
        }
        Ok(())
    }

    fn recv(&mut self, buffer: &mut [u8]) -> Result<usize, SocketError> {
        let Some(datagram) = self.pending.pop_front() else {
            return Err(SocketError::new(
                "recvfrom() failed: Resource temporarily unavailable",
                io::ErrorKind::WouldBlock,
            ));
        };
        let len = datagram.len().min(buffer.len());
        buffer[..len].copy_from_slice(&datagram[..len]);
        Ok(len)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn decode<D: Descriptor>(family: u8, attrs: &Attributes) -> Result<D, i32> {
    D::decode(family, attrs).map_err(|_| libc::EINVAL)
}

/// Stored object the request identifies; the request must be specific
fn find<D: Descriptor + Clone>(
    objects: &[D],
    family: u8,
    attrs: &Attributes,
    specific: impl Fn(&D) -> bool,
) -> Result<Encoded, i32> {
    let desc: D = decode(family, attrs)?;
    if !specific(&desc) {
        return Err(libc::EINVAL);
    }
    objects
        .iter()
        .find(|o| desc.matches(o))
        .map(|o| Encoded::of(o))
        .ok_or(libc::ENOENT)
}

/// An object already reduced to (family, attributes)
struct Encoded {
    family: u8,
    attrs: Vec<u8>,
}

impl Encoded {
    fn of<D: Descriptor>(desc: &D) -> Self {
        let mut attrs = AttrWriter::new();
        desc.encode(&mut attrs).expect("stored objects fit netlink attributes");
        Self {
            family: desc.family().as_u8(),
            attrs: attrs.into_bytes(),
        }
    }
}

fn object_message<D: Descriptor>(desc: &D, seq: u32, flags: u16) -> Vec<u8> {
    let encoded = Encoded::of(desc);
    framed(D::KIND, &encoded, seq, flags)
}

fn object_message_raw(kind: ObjectKind, encoded: &Encoded, seq: u32) -> Vec<u8> {
    framed(kind, encoded, seq, 0)
}

fn framed(kind: ObjectKind, encoded: &Encoded, seq: u32, flags: u16) -> Vec<u8> {
    let mut buf = Vec::new();
    NlMsgHdr {
        nlmsg_len: nlmsg_length(NfGenMsg::SIZE + encoded.attrs.len()),
        nlmsg_type: nft_msg_type(kind.msg_type(MsgOp::New)),
        nlmsg_flags: flags,
        nlmsg_seq: seq,
        nlmsg_pid: 0,
    }
    .write_to(&mut buf);
    NfGenMsg::new(encoded.family, 0).write_to(&mut buf);
    buf.extend_from_slice(&encoded.attrs);
    buf
}

/// `NLMSG_ERROR` answering `request`; errno 0 is an ACK
pub fn error_message(request: &NlMsgHdr, errno: i32) -> Vec<u8> {
    let mut buf = Vec::new();
    NlMsgHdr {
        nlmsg_len: nlmsg_length(4 + NlMsgHdr::SIZE),
        nlmsg_type: NLMSG_ERROR,
        nlmsg_flags: 0,
        nlmsg_seq: request.nlmsg_seq,
        nlmsg_pid: 0,
    }
    .write_to(&mut buf);
    buf.extend_from_slice(&(-errno).to_ne_bytes());
    request.write_to(&mut buf);
    buf
}

fn done_message(seq: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    NlMsgHdr {
        nlmsg_len: nlmsg_length(4),
        nlmsg_type: NLMSG_DONE,
        nlmsg_flags: NLM_F_MULTI,
        nlmsg_seq: seq,
        nlmsg_pid: 0,
    }
    .write_to(&mut buf);
    buf.extend_from_slice(&0i32.to_ne_bytes());
    buf
}
