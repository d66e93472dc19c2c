// ============================================================================
// NF_TABLES SYNC LIBRARY
// ============================================================================
// Synchronises an in-process model of packet-filter objects (tables, chains,
// rules) with the kernel's nf_tables control plane over netlink.
//
// === KEY FEATURES ===
// 1. One control channel per process (netlink/channel.rs)
// 2. Add/delete of single objects, each acknowledged by the kernel
// 3. Listing by snapshot + client-side filter, single-object get by query
// 4. Best-effort rule flush with a per-rule report
//
// === ERROR MODEL ===
// Operations return `Result` and, on failure, also append an ErrorRecord to
// the caller's DiagnosticsQueue (erec.rs). Nothing panics on kernel errors.

// === MODULE DECLARATIONS ===
pub mod codec; // Rule body encoding (RuleCodec)
pub mod config; // Channel configuration
pub mod erec; // Error records and the diagnostics queue
pub mod handle; // Families and handles
pub mod model; // Table, Chain, Rule
pub mod netlink; // Wire format, channel and operations

pub use codec::{CodecError, RawExprCodec, RuleCodec};
pub use config::ChannelConfig;
pub use erec::{DiagnosticsQueue, ErrorRecord, Location, Severity};
pub use handle::{Family, Handle};
pub use model::{Chain, Expr, Rule, Table};
pub use netlink::{Channel, ChannelError, NetlinkCtx};

#[cfg(test)]
mod mock;
