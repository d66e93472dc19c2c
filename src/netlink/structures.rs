//! Binary structures for the nfnetlink / nf_tables protocol
//!
//! Headers use `#[repr(C)]` to match kernel layout exactly. Netlink and
//! nfnetlink headers are in host byte order, except `NfGenMsg::res_id`
//! which the kernel reads as big-endian. Attribute payloads for nf_tables
//! integers are big-endian as well (`nla_put_be32` / `nla_put_be64`).

// NETLINK MESSAGE HEADER

/// Netlink message header (16 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlMsgHdr {
    pub nlmsg_len: u32,
    pub nlmsg_type: u16,
    pub nlmsg_flags: u16,
    pub nlmsg_seq: u32,
    pub nlmsg_pid: u32,
}

impl NlMsgHdr {
    pub const SIZE: usize = std::mem::size_of::<NlMsgHdr>();

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.nlmsg_len.to_ne_bytes());
        buf.extend_from_slice(&self.nlmsg_type.to_ne_bytes());
        buf.extend_from_slice(&self.nlmsg_flags.to_ne_bytes());
        buf.extend_from_slice(&self.nlmsg_seq.to_ne_bytes());
        buf.extend_from_slice(&self.nlmsg_pid.to_ne_bytes());
    }

    /// Read a header from the start of `data`. Caller checks the length.
    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            nlmsg_len: u32::from_ne_bytes([data[0], data[1], data[2], data[3]]),
            nlmsg_type: u16::from_ne_bytes([data[4], data[5]]),
            nlmsg_flags: u16::from_ne_bytes([data[6], data[7]]),
            nlmsg_seq: u32::from_ne_bytes([data[8], data[9], data[10], data[11]]),
            nlmsg_pid: u32::from_ne_bytes([data[12], data[13], data[14], data[15]]),
        })
    }
}

// NFNETLINK GENERIC HEADER

/// nfnetlink generic message header (4 bytes), follows every `NlMsgHdr`
/// addressed to a netfilter subsystem.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NfGenMsg {
    pub nfgen_family: u8,
    pub version: u8,
    /// Big-endian on the wire.
    pub res_id: u16,
}

impl NfGenMsg {
    pub const SIZE: usize = std::mem::size_of::<NfGenMsg>();

    pub fn new(family: u8, res_id: u16) -> Self {
        Self {
            nfgen_family: family,
            version: NFNETLINK_V0,
            res_id,
        }
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.nfgen_family);
        buf.push(self.version);
        buf.extend_from_slice(&self.res_id.to_be_bytes());
    }

    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            nfgen_family: data[0],
            version: data[1],
            res_id: u16::from_be_bytes([data[2], data[3]]),
        })
    }
}

// ATTRIBUTE HEADER

/// Netlink attribute header (4 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlAttr {
    pub nla_len: u16,
    pub nla_type: u16,
}

impl NlAttr {
    pub const SIZE: usize = std::mem::size_of::<NlAttr>();
}

// CONSTANTS

// Netlink protocol and message types
pub const NETLINK_NETFILTER: i32 = 12;
pub const NLMSG_NOOP: u16 = 1;
pub const NLMSG_ERROR: u16 = 2;
pub const NLMSG_DONE: u16 = 3;
pub const NLMSG_OVERRUN: u16 = 4;

// Netlink flags
pub const NLM_F_REQUEST: u16 = 0x1;
pub const NLM_F_MULTI: u16 = 0x2;
pub const NLM_F_ACK: u16 = 0x4;
pub const NLM_F_ECHO: u16 = 0x8;
pub const NLM_F_DUMP_INTR: u16 = 0x10;

// GET request flags
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

// NEW request flags
pub const NLM_F_REPLACE: u16 = 0x100;
pub const NLM_F_EXCL: u16 = 0x200;
pub const NLM_F_CREATE: u16 = 0x400;
pub const NLM_F_APPEND: u16 = 0x800;

// nfnetlink
pub const NFNETLINK_V0: u8 = 0;
pub const NFNL_SUBSYS_NFTABLES: u16 = 10;
pub const NFNL_MSG_BATCH_BEGIN: u16 = 0x10;
pub const NFNL_MSG_BATCH_END: u16 = 0x11;

// nf_tables message types (low byte of nlmsg_type)
pub const NFT_MSG_NEWTABLE: u8 = 0;
pub const NFT_MSG_GETTABLE: u8 = 1;
pub const NFT_MSG_DELTABLE: u8 = 2;
pub const NFT_MSG_NEWCHAIN: u8 = 3;
pub const NFT_MSG_GETCHAIN: u8 = 4;
pub const NFT_MSG_DELCHAIN: u8 = 5;
pub const NFT_MSG_NEWRULE: u8 = 6;
pub const NFT_MSG_GETRULE: u8 = 7;
pub const NFT_MSG_DELRULE: u8 = 8;

// Attribute type flags (upper bits of nla_type)
pub const NLA_F_NESTED: u16 = 0x8000;
pub const NLA_F_NET_BYTEORDER: u16 = 0x4000;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

// NFTA_TABLE_*
pub const NFTA_TABLE_NAME: u16 = 1;
pub const NFTA_TABLE_FLAGS: u16 = 2;
pub const NFTA_TABLE_USE: u16 = 3;
pub const NFTA_TABLE_HANDLE: u16 = 4;

// NFTA_CHAIN_*
pub const NFTA_CHAIN_TABLE: u16 = 1;
pub const NFTA_CHAIN_HANDLE: u16 = 2;
pub const NFTA_CHAIN_NAME: u16 = 3;
pub const NFTA_CHAIN_HOOK: u16 = 4;
pub const NFTA_CHAIN_POLICY: u16 = 5;
pub const NFTA_CHAIN_USE: u16 = 6;
pub const NFTA_CHAIN_TYPE: u16 = 7;

// NFTA_HOOK_*
pub const NFTA_HOOK_HOOKNUM: u16 = 1;
pub const NFTA_HOOK_PRIORITY: u16 = 2;

// NFTA_RULE_*
pub const NFTA_RULE_TABLE: u16 = 1;
pub const NFTA_RULE_CHAIN: u16 = 2;
pub const NFTA_RULE_HANDLE: u16 = 3;
pub const NFTA_RULE_EXPRESSIONS: u16 = 4;
pub const NFTA_RULE_POSITION: u16 = 6;

// NFTA_LIST_* / NFTA_EXPR_*
pub const NFTA_LIST_ELEM: u16 = 1;
pub const NFTA_EXPR_NAME: u16 = 1;
pub const NFTA_EXPR_DATA: u16 = 2;

// HELPER FUNCTIONS

/// Align length to 4-byte boundary
#[must_use]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Length of a netlink message carrying `payload_len` bytes
#[must_use]
pub const fn nlmsg_length(payload_len: usize) -> u32 {
    (NlMsgHdr::SIZE + payload_len) as u32
}

/// Align attribute length to 4-byte boundary
#[must_use]
pub const fn nla_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Length of an attribute carrying `payload_len` bytes, `None` when it
/// does not fit the 16-bit `nla_len` field
#[must_use]
pub const fn nla_length(payload_len: usize) -> Option<u16> {
    let len = NlAttr::SIZE + payload_len;
    if len > u16::MAX as usize {
        None
    } else {
        Some(len as u16)
    }
}

/// Compose the nfnetlink message type for an nf_tables message
#[must_use]
pub const fn nft_msg_type(msg: u8) -> u16 {
    (NFNL_SUBSYS_NFTABLES << 8) | msg as u16
}

/// Split an nfnetlink message type into (subsystem, message)
#[must_use]
pub const fn split_msg_type(nlmsg_type: u16) -> (u16, u8) {
    (nlmsg_type >> 8, (nlmsg_type & 0xff) as u8)
}

// TESTS
