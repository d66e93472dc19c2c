//! Netlink message construction and parsing
//!
//! Builds nf_tables request messages (netlink header, nfnetlink header,
//! TLV attributes) and parses the datagrams the kernel sends back.
//!
//! # Message Format
//!
//! ```text
//! ┌─────────────────────────────┐
//! │ NlMsgHdr (16 bytes)         │  ← type = (NFNL_SUBSYS_NFTABLES << 8) | NFT_MSG_*
//! ├─────────────────────────────┤
//! │ NfGenMsg (4 bytes)          │  ← family, version, res_id
//! ├─────────────────────────────┤
//! │ Attributes (TLV, aligned)   │  ← NFTA_TABLE_* / NFTA_CHAIN_* / NFTA_RULE_*
//! └─────────────────────────────┘
//! ```
//!
//! Writes are framed in a batch so that the kernel's nf_tables transaction
//! code accepts them:
//!
//! ```text
//! [ BATCH_BEGIN ] [ NEWRULE ... ] [ BATCH_END ]
//! ```

use crate::netlink::structures::*;
use thiserror::Error;
use tracing::warn;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors that can occur while building or parsing messages
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid message length {len} (minimum is {min})")]
    InvalidLength { len: usize, min: usize },

    #[error("message length {len} exceeds buffer (offset={offset}, buffer={buffer})")]
    Truncated {
        len: usize,
        offset: usize,
        buffer: usize,
    },

    #[error("attribute length {len} exceeds buffer (offset={offset}, buffer={buffer})")]
    AttributeTruncated {
        len: usize,
        offset: usize,
        buffer: usize,
    },

    #[error("error message too small")]
    ShortError,

    #[error("object message too small for nfgenmsg header")]
    ShortObject,

    #[error("kernel reported receive buffer overrun")]
    Overrun,

    #[error("attribute {nla_type} too long ({len} bytes, limit is 65535)")]
    AttributeTooLong { nla_type: u16, len: usize },
}

// ============================================================================
// ATTRIBUTE CONSTRUCTION
// ============================================================================

/// Writer for TLV attributes
///
/// Integers are written big-endian, matching how nf_tables reads them.
/// Strings are NUL-terminated, matching `NLA_NUL_STRING`/`NLA_STRING`.
#[derive(Debug, Default, Clone)]
pub struct AttrWriter {
    buf: Vec<u8>,
}

/// Marker for an open nested attribute, closed by `AttrWriter::end_nested`
#[must_use]
pub struct NestToken(usize);

impl AttrWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_bytes(&mut self, nla_type: u16, payload: &[u8]) -> Result<(), MessageError> {
        let nla_len = nla_length(payload.len()).ok_or(MessageError::AttributeTooLong {
            nla_type,
            len: NlAttr::SIZE + payload.len(),
        })?;
        let hdr = NlAttr { nla_len, nla_type };
        self.buf.extend_from_slice(&hdr.nla_len.to_ne_bytes());
        self.buf.extend_from_slice(&hdr.nla_type.to_ne_bytes());
        self.buf.extend_from_slice(payload);
        self.pad();
        Ok(())
    }

    pub fn put_str(&mut self, nla_type: u16, value: &str) -> Result<(), MessageError> {
        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.put_bytes(nla_type, &payload)
    }

    pub fn put_u32(&mut self, nla_type: u16, value: u32) -> Result<(), MessageError> {
        self.put_bytes(nla_type, &value.to_be_bytes())
    }

    pub fn put_u64(&mut self, nla_type: u16, value: u64) -> Result<(), MessageError> {
        self.put_bytes(nla_type, &value.to_be_bytes())
    }

    /// Open a nested attribute; everything written until `end_nested`
    /// becomes its payload.
    pub fn begin_nested(&mut self, nla_type: u16) -> NestToken {
        let start = self.buf.len();
        self.buf.extend_from_slice(&0u16.to_ne_bytes());
        self.buf
            .extend_from_slice(&(nla_type | NLA_F_NESTED).to_ne_bytes());
        NestToken(start)
    }

    /// Close a nested attribute, writing its final length
    ///
    /// Fails when the payload written since `begin_nested` does not fit the
    /// 16-bit `nla_len`; the writer must then be discarded.
    pub fn end_nested(&mut self, token: NestToken) -> Result<(), MessageError> {
        let len = self.buf.len() - token.0;
        let nla_len = u16::try_from(len).map_err(|_| MessageError::AttributeTooLong {
            nla_type: self.nested_type(token.0),
            len,
        })?;
        self.buf[token.0..token.0 + 2].copy_from_slice(&nla_len.to_ne_bytes());
        Ok(())
    }

    fn nested_type(&self, start: usize) -> u16 {
        u16::from_ne_bytes([self.buf[start + 2], self.buf[start + 3]]) & NLA_TYPE_MASK
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn pad(&mut self) {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }
}

// ============================================================================
// MESSAGE CONSTRUCTION
// ============================================================================

/// Build one nf_tables message
///
/// # Parameters
///
/// * `msg` - `NFT_MSG_*` message type
/// * `flags` - netlink flags (`NLM_F_REQUEST` is always added)
/// * `family` - nfgenmsg family
/// * `seq` - sequence number echoed back by the kernel
/// * `attrs` - encoded attribute payload
pub fn build_nft_message(msg: u8, flags: u16, family: u8, seq: u32, attrs: &[u8]) -> Vec<u8> {
    let payload_size = NfGenMsg::SIZE + attrs.len();
    let mut buffer = Vec::with_capacity(nlmsg_align(NlMsgHdr::SIZE + payload_size));

    let nlh = NlMsgHdr {
        nlmsg_len: nlmsg_length(payload_size),
        nlmsg_type: nft_msg_type(msg),
        nlmsg_flags: NLM_F_REQUEST | flags,
        nlmsg_seq: seq,
        nlmsg_pid: 0,
    };
    nlh.write_to(&mut buffer);
    NfGenMsg::new(family, 0).write_to(&mut buffer);
    buffer.extend_from_slice(attrs);

    while buffer.len() % 4 != 0 {
        buffer.push(0);
    }

    buffer
}

/// Build a batch delimiter message (`NFNL_MSG_BATCH_BEGIN` / `_END`)
pub fn build_batch_marker(marker: u16, seq: u32) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(NlMsgHdr::SIZE + NfGenMsg::SIZE);
    let nlh = NlMsgHdr {
        nlmsg_len: nlmsg_length(NfGenMsg::SIZE),
        nlmsg_type: marker,
        nlmsg_flags: NLM_F_REQUEST,
        nlmsg_seq: seq,
        nlmsg_pid: 0,
    };
    nlh.write_to(&mut buffer);
    NfGenMsg::new(0, NFNL_SUBSYS_NFTABLES).write_to(&mut buffer);
    buffer
}

/// Wrap a single message in a begin/end batch
///
/// The markers take `seq - 1` and `seq + 1` so the kernel's reply for the
/// inner message is the only one carrying `seq`.
pub fn build_batch(seq: u32, message: &[u8]) -> Vec<u8> {
    let mut buffer = build_batch_marker(NFNL_MSG_BATCH_BEGIN, seq.wrapping_sub(1));
    buffer.extend_from_slice(message);
    buffer.extend_from_slice(&build_batch_marker(NFNL_MSG_BATCH_END, seq.wrapping_add(1)));
    buffer
}

// ============================================================================
// MESSAGE PARSING
// ============================================================================

/// Attributes of one message or nested attribute, in wire order
///
/// A `Vec` rather than a map: nested lists (`NFTA_LIST_ELEM`) repeat the
/// same type and their order is significant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(u16, Vec<u8>)>,
}

impl Attributes {
    pub fn get(&self, nla_type: u16) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(ty, _)| *ty == nla_type)
            .map(|(_, payload)| payload.as_slice())
    }

    pub fn get_all(&self, nla_type: u16) -> impl Iterator<Item = &[u8]> {
        self.entries
            .iter()
            .filter(move |(ty, _)| *ty == nla_type)
            .map(|(_, payload)| payload.as_slice())
    }

    pub fn contains(&self, nla_type: u16) -> bool {
        self.get(nla_type).is_some()
    }

    /// NUL-terminated string; `None` if absent or not UTF-8
    pub fn get_str(&self, nla_type: u16) -> Option<String> {
        let payload = self.get(nla_type)?;
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        std::str::from_utf8(&payload[..end]).ok().map(str::to_owned)
    }

    pub fn get_u32(&self, nla_type: u16) -> Option<u32> {
        let payload = self.get(nla_type)?;
        let bytes: [u8; 4] = payload.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    pub fn get_u64(&self, nla_type: u16) -> Option<u64> {
        let payload = self.get(nla_type)?;
        let bytes: [u8; 8] = payload.get(..8)?.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    pub fn get_nested(&self, nla_type: u16) -> Result<Option<Attributes>, MessageError> {
        match self.get(nla_type) {
            Some(payload) => parse_attributes(payload).map(Some),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One message out of a received datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedMessage {
    /// An nf_tables object (table, chain or rule) with its attributes
    Object {
        header: NlMsgHdr,
        family: u8,
        attributes: Attributes,
    },

    /// End of a multi-part dump
    Done { seq: u32 },

    /// Error or acknowledgment
    ///
    /// `errno` is positive; 0 means ACK.
    Error { seq: u32, errno: i32 },
}

impl ParsedMessage {
    pub fn seq(&self) -> u32 {
        match self {
            ParsedMessage::Object { header, .. } => header.nlmsg_seq,
            ParsedMessage::Done { seq } | ParsedMessage::Error { seq, .. } => *seq,
        }
    }
}

/// Parse every message in a received datagram
///
/// # Errors
///
/// Returns error if a header length is invalid or runs past the buffer,
/// or if the kernel reports `NLMSG_OVERRUN`.
pub fn parse_netlink_messages(data: &[u8]) -> Result<Vec<ParsedMessage>, MessageError> {
    let mut messages = Vec::new();
    let mut offset = 0;

    while offset + NlMsgHdr::SIZE <= data.len() {
        let Some(nlh) = NlMsgHdr::read_from(&data[offset..]) else {
            break;
        };
        let msg_len = nlh.nlmsg_len as usize;

        if msg_len < NlMsgHdr::SIZE {
            return Err(MessageError::InvalidLength {
                len: msg_len,
                min: NlMsgHdr::SIZE,
            });
        }
        if offset + msg_len > data.len() {
            return Err(MessageError::Truncated {
                len: msg_len,
                offset,
                buffer: data.len(),
            });
        }

        let body = &data[offset + NlMsgHdr::SIZE..offset + msg_len];

        match nlh.nlmsg_type {
            NLMSG_DONE => messages.push(ParsedMessage::Done {
                seq: nlh.nlmsg_seq,
            }),
            NLMSG_ERROR => {
                let errno = parse_error_message(&data[offset..offset + msg_len])?;
                messages.push(ParsedMessage::Error {
                    seq: nlh.nlmsg_seq,
                    errno,
                });
            }
            NLMSG_OVERRUN => return Err(MessageError::Overrun),
            NLMSG_NOOP | NFNL_MSG_BATCH_BEGIN | NFNL_MSG_BATCH_END => {}
            ty if split_msg_type(ty).0 == NFNL_SUBSYS_NFTABLES => {
                let genmsg = NfGenMsg::read_from(body).ok_or(MessageError::ShortObject)?;
                let attributes = parse_attributes(&body[NfGenMsg::SIZE..])?;
                messages.push(ParsedMessage::Object {
                    header: nlh,
                    family: genmsg.nfgen_family,
                    attributes,
                });
            }
            other => warn!(nlmsg_type = other, "skipping unknown netlink message type"),
        }

        offset += nlmsg_align(msg_len);
    }

    Ok(messages)
}

/// Parse TLV attributes
///
/// The nested/byte-order flag bits are masked out of the attribute type.
pub fn parse_attributes(data: &[u8]) -> Result<Attributes, MessageError> {
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset + NlAttr::SIZE <= data.len() {
        let attr_len = u16::from_ne_bytes([data[offset], data[offset + 1]]) as usize;
        let attr_type = u16::from_ne_bytes([data[offset + 2], data[offset + 3]]);

        if attr_len < NlAttr::SIZE {
            break;
        }
        if offset + attr_len > data.len() {
            return Err(MessageError::AttributeTruncated {
                len: attr_len,
                offset,
                buffer: data.len(),
            });
        }

        let payload = data[offset + NlAttr::SIZE..offset + attr_len].to_vec();
        entries.push((attr_type & NLA_TYPE_MASK, payload));

        offset += nla_align(attr_len);
    }

    Ok(Attributes { entries })
}

/// Parse the errno out of an `NLMSG_ERROR` message
///
/// The kernel sends a negative errno; this returns it positive (0 = ACK).
pub fn parse_error_message(data: &[u8]) -> Result<i32, MessageError> {
    let header_size = NlMsgHdr::SIZE;
    if data.len() < header_size + 4 {
        return Err(MessageError::ShortError);
    }
    let errno = i32::from_ne_bytes([
        data[header_size],
        data[header_size + 1],
        data[header_size + 2],
        data[header_size + 3],
    ]);
    Ok(-errno)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_message(nlmsg_type: u16, seq: u32, body: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        NlMsgHdr {
            nlmsg_len: nlmsg_length(body.len()),
            nlmsg_type,
            nlmsg_flags: 0,
            nlmsg_seq: seq,
            nlmsg_pid: 0,
        }
        .write_to(&mut data);
        data.extend_from_slice(body);
        while data.len() % 4 != 0 {
            data.push(0);
        }
        data
    }

    #[test]
    fn test_build_request() {
        let mut attrs = AttrWriter::new();
        attrs.put_str(NFTA_TABLE_NAME, "filter").expect("attr");
        let message = build_nft_message(NFT_MSG_NEWTABLE, NLM_F_ACK, 1, 42, attrs.as_bytes());

        assert_eq!(message.len() % 4, 0);
        let nlh = NlMsgHdr::read_from(&message).expect("header");
        assert_eq!(nlh.nlmsg_type, nft_msg_type(NFT_MSG_NEWTABLE));
        assert_eq!(nlh.nlmsg_flags, NLM_F_REQUEST | NLM_F_ACK);
        assert_eq!(nlh.nlmsg_seq, 42);
        // 16 header + 4 nfgenmsg + 4 attr header + "filter\0" padded to 8
        assert_eq!(nlh.nlmsg_len, 32);
    }

    #[test]
    fn test_batch_framing() {
        let inner = build_nft_message(NFT_MSG_DELTABLE, NLM_F_ACK, 1, 5, &[]);
        let batch = build_batch(5, &inner);

        let begin = NlMsgHdr::read_from(&batch).expect("begin");
        assert_eq!(begin.nlmsg_type, NFNL_MSG_BATCH_BEGIN);
        assert_eq!(begin.nlmsg_seq, 4);
        let gen_hdr = NfGenMsg::read_from(&batch[NlMsgHdr::SIZE..]).expect("nfgenmsg");
        assert_eq!(gen_hdr.res_id, NFNL_SUBSYS_NFTABLES);

        let end_offset = batch.len() - (NlMsgHdr::SIZE + NfGenMsg::SIZE);
        let end = NlMsgHdr::read_from(&batch[end_offset..]).expect("end");
        assert_eq!(end.nlmsg_type, NFNL_MSG_BATCH_END);
        assert_eq!(end.nlmsg_seq, 6);
    }

    #[test]
    fn test_nested_attribute_length() {
        let mut attrs = AttrWriter::new();
        let hook = attrs.begin_nested(NFTA_CHAIN_HOOK);
        attrs.put_u32(NFTA_HOOK_HOOKNUM, 1).expect("attr");
        attrs.put_u32(NFTA_HOOK_PRIORITY, 0).expect("attr");
        attrs.end_nested(hook).expect("attr");

        let parsed = parse_attributes(attrs.as_bytes()).expect("parse");
        assert_eq!(parsed.len(), 1);
        let nested = parsed
            .get_nested(NFTA_CHAIN_HOOK)
            .expect("nested parse")
            .expect("hook present");
        assert_eq!(nested.get_u32(NFTA_HOOK_HOOKNUM), Some(1));
        assert_eq!(nested.get_u32(NFTA_HOOK_PRIORITY), Some(0));
    }

    #[test]
    fn test_parse_object_and_done() {
        let mut body = Vec::new();
        NfGenMsg::new(2, 0).write_to(&mut body);
        let mut attrs = AttrWriter::new();
        attrs.put_str(NFTA_TABLE_NAME, "nat").expect("attr");
        attrs.put_u32(NFTA_TABLE_USE, 3).expect("attr");
        body.extend_from_slice(attrs.as_bytes());

        let mut data = raw_message(nft_msg_type(NFT_MSG_NEWTABLE), 9, &body);
        data.extend_from_slice(&raw_message(NLMSG_DONE, 9, &0i32.to_ne_bytes()));

        let messages = parse_netlink_messages(&data).expect("parse");
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            ParsedMessage::Object {
                family, attributes, ..
            } => {
                assert_eq!(*family, 2);
                assert_eq!(attributes.get_str(NFTA_TABLE_NAME).as_deref(), Some("nat"));
                assert_eq!(attributes.get_u32(NFTA_TABLE_USE), Some(3));
            }
            other => panic!("expected object, got {:?}", other),
        }
        assert_eq!(messages[1], ParsedMessage::Done { seq: 9 });
    }

    #[test]
    fn test_parse_error_message_enoent() {
        let mut body = (-2i32).to_ne_bytes().to_vec();
        body.extend_from_slice(&[0u8; 16]);
        let data = raw_message(NLMSG_ERROR, 3, &body);

        let messages = parse_netlink_messages(&data).expect("parse");
        assert_eq!(messages, vec![ParsedMessage::Error { seq: 3, errno: 2 }]);
    }

    #[test]
    fn test_parse_truncated_message() {
        let mut data = raw_message(NLMSG_DONE, 1, &[0u8; 4]);
        data[0] = 64;
        assert!(matches!(
            parse_netlink_messages(&data),
            Err(MessageError::Truncated { .. })
        ));
    }

    #[test]
    fn test_repeated_list_elements_keep_order() {
        let mut attrs = AttrWriter::new();
        attrs.put_str(NFTA_LIST_ELEM, "first").expect("attr");
        attrs.put_str(NFTA_LIST_ELEM, "second").expect("attr");
        let parsed = parse_attributes(attrs.as_bytes()).expect("parse");
        let elems: Vec<&[u8]> = parsed.get_all(NFTA_LIST_ELEM).collect();
        assert_eq!(elems, vec![b"first\0".as_slice(), b"second\0".as_slice()]);
    }

    #[test]
    fn test_oversized_attribute_is_refused() {
        let mut attrs = AttrWriter::new();
        let err = attrs
            .put_bytes(NFTA_EXPR_DATA, &vec![0u8; 65532])
            .expect_err("too long for nla_len");
        assert!(matches!(
            err,
            MessageError::AttributeTooLong { nla_type: NFTA_EXPR_DATA, len: 65536 }
        ));
        assert!(attrs.as_bytes().is_empty());
    }

    #[test]
    fn test_oversized_nest_is_refused() {
        let mut attrs = AttrWriter::new();
        let list = attrs.begin_nested(NFTA_RULE_EXPRESSIONS);
        attrs.put_bytes(NFTA_LIST_ELEM, &vec![0u8; 40_000]).expect("first half");
        attrs.put_bytes(NFTA_LIST_ELEM, &vec![0u8; 40_000]).expect("second half");

        match attrs.end_nested(list) {
            Err(MessageError::AttributeTooLong { nla_type, len }) => {
                assert_eq!(nla_type, NFTA_RULE_EXPRESSIONS);
                assert!(len > usize::from(u16::MAX));
            }
            other => panic!("expected AttributeTooLong, got {:?}", other),
        }
    }
}
