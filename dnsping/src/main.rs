//! dnsping binary entrypoint.
//!
//! Argument parsing and rendering happen here; the probe loop itself lives
//! in `dnsdiag::ping`. Probe results are streamed over a channel so each
//! probe prints as soon as it finishes, with the statistics block following
//! once the run is over.

mod cli;

use std::net::IpAddr;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use tokio::sync::mpsc;

use dnsdiag::error::Result;
use dnsdiag::hostname::{check_source_family, resolve_server, system_nameserver, valid_hostname};
use dnsdiag::ping::{ping, PingSummary, ProbeOutcome, ProbeReport};
use dnsdiag::proto::ServerTarget;
use dnsdiag::shutdown::Shutdown;

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
        return Err(dnsdiag::error::DiagError::InvalidInput(format!(
            "invalid hostname: {}",
            args.hostname
        )));
    }

    let spec = args.query_spec()?;
    let opts = args.ping_options()?;
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
    log::debug!("probing {:?} with {:?}", target, spec);

    println!(
        "dnsping DNS: {}:{}, hostname: {}, proto: {}, rdatatype: {}",
        target.display_addr(),
        target.port,
        args.hostname,
        protocol,
        spec.rdtype
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_probes(
        rx,
        target.display_addr(),
        args.quiet,
        args.verbose,
    ));

    let summary = ping(&target, &spec, &opts, &shutdown, Some(tx)).await?;
    let _ = printer.await;

    print_summary(&target.display_addr(), &summary);
    Ok(())
}

async fn print_probes(
    mut rx: mpsc::UnboundedReceiver<ProbeReport>,
    server: String,
    quiet: bool,
    verbose: bool,
) {
    let mut unreachable_reported = false;

    while let Some(report) = rx.recv().await {
        match report.outcome {
            ProbeOutcome::Reply(response) => {
                if !quiet {
                    let mut extras = String::new();
                    for option in response.decoded_options() {
                        extras.push_str(&format!(" [{}]", option));
                    }
                    println!(
                        "{} bytes from {}: seq={:<3} time={:.3} ms{}",
                        response.wire_len(),
                        server,
                        report.seq,
                        response.elapsed_ms,
                        extras
                    );
                }
                if verbose {
                    println!(
                        "rcode: {}, flags: {} {}",
                        response.rcode_text,
                        response.flags,
                        response.edns_flags_text()
                    );
                    for answer in &response.answers {
                        println!("{}", answer);
                    }
                }
            }
            ProbeOutcome::Timeout => {
                if !quiet {
                    println!("request timeout (seq {})", report.seq);
                }
            }
            ProbeOutcome::Unreachable(msg) => {
                if !unreachable_reported {
                    eprintln!("ERROR: {}", msg);
                    unreachable_reported = true;
                }
            }
            ProbeOutcome::Invalid(_) => {
                if !quiet {
                    println!("invalid response (seq {})", report.seq);
                }
            }
        }
    }
}

fn print_summary(server: &str, summary: &PingSummary) {
    println!("\n--- {} dnsping statistics ---", server);
    println!(
        "{} requests transmitted, {} responses received, {:.0}% lost",
        summary.sent, summary.received, summary.lost_percent
    );
    println!(
        "min={:.3} ms, avg={:.3} ms, max={:.3} ms, stddev={:.3} ms",
        summary.stats.min, summary.stats.avg, summary.stats.max, summary.stats.stddev
    );

    if let Some(response) = &summary.response {
        let ttl = response
            .answer_ttl
            .map(|t| t.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        println!(
            "rcode={}, flags=[{}{}], answers={}, ttl={}",
            summary.rcode_text,
            response.flags,
            if response.dnssec_ok { " DO" } else { "" },
            response.answers.len(),
            ttl
        );
    } else {
        println!("rcode={}", summary.rcode_text);
    }
}
