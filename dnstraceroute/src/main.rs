//! dnstraceroute binary entrypoint.
//!
//! Wires the CLI into `dnsdiag::trace`, prints each hop as it is
//! discovered, and closes with the optional expert report. The whois cache
//! is restored before the trace and written back however the run ends.

mod cli;

use std::net::IpAddr;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use tokio::sync::mpsc;

use dnsdiag::error::{DiagError, Result};
use dnsdiag::hostname::{check_source_family, resolve_server, system_nameserver, valid_hostname};
use dnsdiag::proto::ServerTarget;
use dnsdiag::shutdown::Shutdown;
use dnsdiag::trace::{expert_hint, trace, TraceHop};
use dnsdiag::whois::WhoisCache;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init_from_env(Env::default().default_filter_or("warn"));
    let args = cli::Cli::parse();
    let shutdown = Shutdown::install();

    match run(args, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: cli::Cli, shutdown: Shutdown) -> Result<()> {
    if !valid_hostname(&args.hostname, true) {
        return Err(DiagError::InvalidInput(format!(
            "invalid hostname: {}",
            args.hostname
        )));
    }

    let spec = args.query_spec()?;
    let opts = args.trace_options()?;
    let family = args.family();

    let server_input = match &args.server {
        Some(server) => server.clone(),
        None => system_nameserver(family)?.to_string(),
    };
    let ip = resolve_server(&server_input, family).await?;
    if let Some(src) = args.src_ip {
        check_source_family(src, ip)?;
    }

    let protocol = args.protocol();
    let port = args.port.unwrap_or_else(|| protocol.default_port());
    let hostname = if server_input.parse::<IpAddr>().is_ok() {
        None
    } else {
        Some(server_input)
    };
    let target = ServerTarget::new(ip, hostname, port, protocol);
    log::debug!("tracing towards {:?}", target);

    if !args.quiet {
        println!(
            "dnstraceroute DNS: {}:{}, hostname: {}, rdatatype: {}",
            target.display_addr(),
            target.port,
            args.hostname,
            spec.rdtype
        );
    }

    let mut whois = WhoisCache::restore();

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_hops(rx));

    let result = trace(&target, &spec, &opts, &shutdown, &mut whois, Some(tx)).await;
    let _ = printer.await;

    // written back even when the trace itself failed
    whois.save();
    let path = result?;

    if args.expert && !shutdown.requested() {
        println!("\n=== Expert Hints ===");
        match expert_hint(&path) {
            Some(hint) => println!(" [*] {}", hint),
            None => println!(" [*] No expert hint available for this trace"),
        }
    }

    Ok(())
}

async fn print_hops(mut rx: mpsc::UnboundedReceiver<TraceHop>) {
    while let Some(hop) = rx.recv().await {
        match hop.address {
            None => println!("{}\t *", hop.ttl),
            Some(address) => {
                let name = hop
                    .hostname
                    .clone()
                    .unwrap_or_else(|| address.to_string());
                let asn = hop
                    .asn
                    .as_ref()
                    .filter(|record| record.asn != "NA")
                    .map(|record| format!("[AS{} {}] ", record.asn, record.owner))
                    .unwrap_or_default();
                let nsid = hop
                    .nsid
                    .as_ref()
                    .map(|id| format!("[NSID: {}] ", id))
                    .unwrap_or_default();
                println!(
                    "{}\t{} ({}) {}{}{:.3} ms",
                    hop.ttl, name, address, asn, nsid, hop.elapsed_ms
                );
            }
        }
    }
}
