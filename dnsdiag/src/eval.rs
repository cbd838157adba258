//! The multi-resolver evaluator.
//!
//! Fans [`crate::ping::ping`] out across a resolver list on a bounded worker
//! pool and hands rows back in completion order. A server that cannot be
//! resolved or probed yields an error row; the batch keeps going.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::error::Result;
use crate::hostname::{resolve_server, AddressFamily};
use crate::ping::{ping, PingOptions, PingSummary};
use crate::proto::{Protocol, ServerTarget};
use crate::query::QuerySpec;
use crate::shutdown::Shutdown;

/// Upper bound on concurrently probed servers.
pub const MAX_WORKERS: usize = 10;

/// Pause after the warmup pass, letting resolver caches settle.
const WARMUP_SETTLE: std::time::Duration = std::time::Duration::from_secs(1);

/// Evaluation parameters shared by every server in the batch.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub ping: PingOptions,
    pub protocol: Protocol,
    /// Explicit destination port; the protocol default when absent.
    pub port: Option<u16>,
    pub family: Option<AddressFamily>,
    /// Prime every resolver with one probe before measuring.
    pub warmup: bool,
}

/// One finished server, in completion order.
#[derive(Debug)]
pub struct EvalRow {
    /// Position of the server in the normalized input list.
    pub index: usize,
    /// The server exactly as listed.
    pub server: String,
    pub result: Result<PingSummary>,
}

/// Strip whitespace, drop blank lines and `#` comments.
pub fn normalize_server_list<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .map(|line| line.as_ref().trim().replace(' ', ""))
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

/// Evaluate every server in the list; rows arrive on the returned channel as
/// the workers finish. Cancellation stops the scheduling of further servers;
/// already-running probes finish their current iteration.
pub fn evaluate(
    servers: Vec<String>,
    spec: QuerySpec,
    opts: EvalOptions,
    shutdown: Shutdown,
) -> mpsc::UnboundedReceiver<EvalRow> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        if opts.warmup {
            warmup_pass(&servers, &spec, &opts, &shutdown).await;
        }

        let semaphore = Arc::new(Semaphore::new(MAX_WORKERS));
        let mut workers = Vec::new();

        for (index, server) in servers.into_iter().enumerate() {
            if shutdown.requested() {
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            let tx = tx.clone();
            let spec = spec.clone();
            let opts = opts.clone();
            let shutdown = shutdown.clone();
            workers.push(tokio::spawn(async move {
                let _permit = permit;
                let result = probe_one(&server, &spec, &opts, &shutdown).await;
                let _ = tx.send(EvalRow {
                    index,
                    server,
                    result,
                });
            }));
        }

        for worker in workers {
            let _ = worker.await;
        }
    });

    rx
}

/// Resolve one listed server and run the full probe loop against it.
async fn probe_one(
    server: &str,
    spec: &QuerySpec,
    opts: &EvalOptions,
    shutdown: &Shutdown,
) -> Result<PingSummary> {
    let ip = resolve_server(server, opts.family).await?;
    let hostname = if server.parse::<std::net::IpAddr>().is_ok() {
        None
    } else {
        Some(server.to_string())
    };
    let port = opts.port.unwrap_or_else(|| opts.protocol.default_port());
    let target = ServerTarget::new(ip, hostname, port, opts.protocol);

    ping(&target, spec, &opts.ping, shutdown, None).await
}

/// One best-effort probe per server so every resolver starts the measured
/// run with a warm cache. Errors are ignored entirely.
async fn warmup_pass(servers: &[String], spec: &QuerySpec, opts: &EvalOptions, shutdown: &Shutdown) {
    let mut warm_opts = opts.clone();
    warm_opts.ping.count = 1;
    warm_opts.ping.interval = std::time::Duration::ZERO;

    for server in servers {
        if shutdown.requested() {
            return;
        }
        let _ = probe_one(server, spec, &warm_opts, shutdown).await;
    }

    shutdown.sleep(WARMUP_SETTLE).await;
}
