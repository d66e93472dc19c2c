//! nf_tables over netlink
//!
//! # Layers
//!
//! ## Wire
//! - `structures`: headers, constants, alignment helpers
//! - `message`: attribute encoding, message/batch construction, parsing
//! - `socket`: the `Transport` trait and the real `NETLINK_NETFILTER` socket
//!
//! ## Protocol
//! - `descriptor`: attribute-level tables, chains and rules
//! - `channel`: the control channel (writes, dumps, query drains)
//!
//! ## Operations
//! - `enumerate`: the listing pipeline, query drains and flush
//! - `table`, `chain`, `rule`: per-kind add/delete/list/get/flush
//!
//! Every operation takes a `NetlinkCtx`, returns a `Result` and, on failure,
//! has already queued one error record in the context's diagnostics queue.
//!
//! ## Conditional Compilation
//!
//! Only `NetlinkSocket` (and therefore `Channel::open`) is Linux-only.
//! The rest builds anywhere, so the protocol can be exercised against an
//! in-memory transport.

// ============================================================================
// SUBMODULE DECLARATIONS
// ============================================================================

// Wire
pub mod message; // Attribute encoding and message parsing
pub mod socket; // Transport trait + netfilter socket
pub mod structures; // Headers and protocol constants

// Protocol
pub mod channel; // Control channel
pub mod descriptor; // Object descriptors

// Operations
pub mod chain;
pub mod enumerate;
pub mod rule;
pub mod table;

// ============================================================================
// PUBLIC RE-EXPORTS
// ============================================================================

// === CHANNEL ===
pub use channel::{Channel, ChannelError, Drain, Snapshot};
#[cfg(target_os = "linux")]
pub use socket::NetlinkSocket;
pub use socket::{SocketError, Transport};

// === CONTEXT AND RESULTS ===
pub use enumerate::{FlushOutcome, FlushReport, NetlinkCtx, ParseError};
pub use rule::RuleFlushReport;

// === OPERATIONS ===
pub use chain::{add_chain, delete_chain, flush_chain, get_chain, list_chain, list_chains};
pub use rule::{add_rule, delete_rule, flush_rules, get_rule, list_rules};
pub use table::{add_table, delete_table, flush_table, get_table, list_table, list_tables};
