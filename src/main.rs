// ============================================================================
// nftsync - Ruleset Listing Entry Point
// ============================================================================
//
// Opens the nf_tables control channel, lists every table, chain and rule
// (optionally restricted to one family) and prints them as JSON on stdout.
// Diagnostics queued by the operations go in the same document, under
// "diagnostics"; stderr carries only the tracing log.
//
// Usage: nftsync [family]
//
// Logging goes through tracing; set RUST_LOG (e.g. RUST_LOG=nftsync=debug)
// to see channel traffic. Channel tuning comes from NFTSYNC_* variables,
// see ChannelConfig::from_env.
//
// ============================================================================

use std::env;
use std::process::ExitCode;

use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nftsync::{Chain, DiagnosticsQueue, ErrorRecord, Family, Handle, Rule, Table};

/// Everything printed on stdout
#[derive(Debug, Default, Serialize)]
struct Ruleset {
    tables: Vec<Table>,
    chains: Vec<Chain>,
    rules: Vec<Rule>,
    diagnostics: Vec<ErrorRecord>,
}

/// The whole stdout document; diagnostics are reported here and nowhere else
fn render(ruleset: &Ruleset) -> serde_json::Result<String> {
    serde_json::to_string_pretty(ruleset)
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

fn parse_family() -> Result<Family, String> {
    match env::args().nth(1) {
        Some(arg) => arg.parse(),
        None => Ok(Family::Unspec),
    }
}

#[cfg(target_os = "linux")]
fn list_ruleset(family: Family) -> Result<Ruleset, nftsync::ChannelError> {
    use nftsync::netlink::{list_chains, list_rules, list_tables};
    use nftsync::{Channel, ChannelConfig, NetlinkCtx, RawExprCodec};

    let config = ChannelConfig::from_env();
    let mut chan = Channel::open(config)?;
    let mut msgs = DiagnosticsQueue::new();
    let mut ruleset = Ruleset::default();

    {
        let mut ctx = NetlinkCtx::new(&mut chan, &mut msgs, &RawExprCodec);
        let h = Handle::new(family);

        // A failed listing is already in the diagnostics; keep going
        let _ = list_tables(&mut ctx, &h, &mut ruleset.tables);
        let _ = list_chains(&mut ctx, &h, &mut ruleset.chains);
        let _ = list_rules(&mut ctx, &h, &mut ruleset.rules);
    }

    chan.close();
    ruleset.diagnostics = msgs.drain();
    Ok(ruleset)
}

#[cfg(not(target_os = "linux"))]
fn list_ruleset(_family: Family) -> Result<Ruleset, nftsync::ChannelError> {
    Err(nftsync::netlink::SocketError::new(
        "nf_tables is only available on Linux",
        std::io::ErrorKind::Unsupported,
    )
    .into())
}

fn main() -> ExitCode {
    init_logging();

    let family = match parse_family() {
        Ok(family) => family,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("usage: nftsync [inet|ip|ip6|arp|bridge|netdev]");
            return ExitCode::from(2);
        }
    };

    let ruleset = match list_ruleset(family) {
        Ok(ruleset) => ruleset,
        Err(e) => {
            error!("cannot open nf_tables channel: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        tables = ruleset.tables.len(),
        chains = ruleset.chains.len(),
        rules = ruleset.rules.len(),
        diagnostics = ruleset.diagnostics.len(),
        "ruleset listed"
    );

    match render(&ruleset) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            error!("cannot serialize ruleset: {e}");
            return ExitCode::FAILURE;
        }
    }

    if ruleset.diagnostics.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_are_part_of_the_document() {
        let ruleset = Ruleset {
            diagnostics: vec![ErrorRecord::error(None, "Incomplete table received")],
            ..Ruleset::default()
        };

        let json = render(&ruleset).expect("render");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        let diagnostics = value["diagnostics"].as_array().expect("diagnostics array");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0]["message"], "Incomplete table received");
        assert!(value["tables"].as_array().is_some_and(Vec::is_empty));
    }
}
