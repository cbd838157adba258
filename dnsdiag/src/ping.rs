//! The query engine: N timed probes against one resolver.
//!
//! Probes within a run are strictly sequential; their latencies keep probe
//! order. Recoverable failures (timeout, unreachable network, malformed
//! reply) count as losses and the loop continues; anything else aborts the
//! run and propagates. The inter-probe pause is raced against the shutdown
//! handle so cancellation is observed promptly.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::error::{DiagError, Result};
use crate::proto::ServerTarget;
use crate::query::QuerySpec;
use crate::response::ResponseHandle;
use crate::shutdown::Shutdown;
use crate::stats::{self, LatencyStats};
use crate::transport::{dispatch, DispatchOptions};

/// Probe-loop configuration.
#[derive(Debug, Clone, Copy)]
pub struct PingOptions {
    /// Number of probes; 0 means unlimited (until interrupted).
    pub count: u32,
    pub timeout: Duration,
    /// Pause between probe starts; the probe's own duration is deducted.
    pub interval: Duration,
    pub source_ip: Option<std::net::IpAddr>,
    pub source_port: u16,
    /// Installed on the probe socket by the trace engine.
    pub socket_ttl: Option<u32>,
}

impl PingOptions {
    pub fn new(count: u32, timeout: Duration) -> Self {
        Self {
            count,
            timeout,
            interval: Duration::from_secs(1),
            source_ip: None,
            source_port: 0,
            socket_ttl: None,
        }
    }
}

/// What a single probe produced.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Reply(ResponseHandle),
    Timeout,
    Unreachable(String),
    Invalid(String),
}

/// One probe's result, streamed to the UI while the run is still going.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub seq: u32,
    pub outcome: ProbeOutcome,
}

/// Aggregate over one run against one server.
#[derive(Debug, Clone)]
pub struct PingSummary {
    pub sent: u32,
    pub received: u32,
    pub lost_percent: f64,
    pub stats: LatencyStats,
    /// Rcode mnemonic of the last reply; `No Response` when none arrived,
    /// `Invalid Response` when the last reply was undecodable.
    pub rcode_text: String,
    /// The last successful response, for flag/option/answer display.
    pub response: Option<ResponseHandle>,
}

/// Run `opts.count` probes of `spec` against `target`.
///
/// `progress` receives one [`ProbeReport`] per attempted probe, live.
/// A probe counts as sent only if its query was actually dispatched; a
/// shutdown observed at the loop head does not inflate the counter.
pub async fn ping(
    target: &ServerTarget,
    spec: &QuerySpec,
    opts: &PingOptions,
    shutdown: &Shutdown,
    progress: Option<mpsc::UnboundedSender<ProbeReport>>,
) -> Result<PingSummary> {
    let dispatch_opts = DispatchOptions {
        timeout: opts.timeout,
        source_ip: opts.source_ip,
        source_port: opts.source_port,
        socket_ttl: opts.socket_ttl,
    };

    let mut response_times: Vec<f64> = Vec::new();
    let mut sent: u32 = 0;
    let mut rcode_text = String::from("No Response");
    let mut last_response: Option<ResponseHandle> = None;
    let mut warned_unreachable = false;

    let mut seq: u32 = 0;
    loop {
        if opts.count != 0 && seq >= opts.count {
            break;
        }
        if shutdown.requested() {
            break;
        }

        // rebuilt per probe: fresh transaction id, cookie and miss label
        let message = spec.build()?;
        let started = Instant::now();

        let outcome = match dispatch(message, target, &dispatch_opts).await {
            Ok(response) => ProbeOutcome::Reply(response),
            Err(DiagError::Timeout) => ProbeOutcome::Timeout,
            Err(DiagError::TransientNetwork(msg)) => ProbeOutcome::Unreachable(msg),
            Err(DiagError::InvalidResponse(msg)) => ProbeOutcome::Invalid(msg),
            Err(fatal) => return Err(fatal),
        };
        sent += 1;

        match &outcome {
            ProbeOutcome::Reply(response) => {
                response_times.push(response.elapsed_ms);
                rcode_text = response.rcode_text.clone();
                last_response = Some(response.clone());
            }
            ProbeOutcome::Timeout => {}
            ProbeOutcome::Unreachable(msg) => {
                if !warned_unreachable {
                    log::warn!("{}", msg);
                    warned_unreachable = true;
                }
            }
            ProbeOutcome::Invalid(_) => {
                rcode_text = String::from("Invalid Response");
            }
        }

        if let Some(tx) = &progress {
            let _ = tx.send(ProbeReport {
                seq,
                outcome: outcome.clone(),
            });
        }

        seq += 1;
        let more_to_come = opts.count == 0 || seq < opts.count;
        if more_to_come && !shutdown.requested() {
            if let Some(rest) = opts.interval.checked_sub(started.elapsed()) {
                shutdown.sleep(rest).await;
            }
        }
    }

    let received = response_times.len() as u32;
    Ok(PingSummary {
        sent,
        received,
        lost_percent: stats::loss_percent(sent, received),
        stats: stats::summarize(&response_times),
        rcode_text,
        response: last_response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Protocol;
    use crate::query::QuerySpec;
    use hickory_proto::op::{Message, MessageType};
    use hickory_proto::rr::RecordType;
    use tokio::net::UdpSocket;

    /// A one-shot UDP responder that echoes a minimal DNS answer.
    async fn spawn_responder(replies: u32) -> std::net::SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            for _ in 0..replies {
                let (len, src) = socket.recv_from(&mut buf).await.unwrap();
                let query = Message::from_vec(&buf[..len]).unwrap();
                let mut reply = Message::new();
                reply
                    .set_id(query.id())
                    .set_message_type(MessageType::Response)
                    .set_recursion_desired(true)
                    .set_recursion_available(true);
                for q in query.queries() {
                    reply.add_query(q.clone());
                }
                let wire = reply.to_vec().unwrap();
                socket.send_to(&wire, src).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn two_probes_two_replies() {
        let addr = spawn_responder(2).await;
        let target = ServerTarget::new(addr.ip(), None, addr.port(), Protocol::Udp);
        let spec = QuerySpec::new("example.com", RecordType::A);
        let mut opts = PingOptions::new(2, Duration::from_secs(2));
        opts.interval = Duration::from_millis(1);

        let summary = ping(&target, &spec, &opts, &Shutdown::disabled(), None)
            .await
            .unwrap();
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.received, 2);
        assert_eq!(summary.lost_percent, 0.0);
        assert_eq!(summary.rcode_text, "NOERROR");
        assert!(summary.stats.min <= summary.stats.avg);
        assert!(summary.response.is_some());
    }

    #[tokio::test]
    async fn silent_server_counts_losses() {
        // bind but never answer
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let _keep_alive = socket;

        let target = ServerTarget::new(addr.ip(), None, addr.port(), Protocol::Udp);
        let spec = QuerySpec::new("example.com", RecordType::A);
        let mut opts = PingOptions::new(3, Duration::from_millis(50));
        opts.interval = Duration::from_millis(1);

        let summary = ping(&target, &spec, &opts, &Shutdown::disabled(), None)
            .await
            .unwrap();
        assert_eq!(summary.sent, 3);
        assert_eq!(summary.received, 0);
        assert_eq!(summary.lost_percent, 100.0);
        assert_eq!(summary.stats, LatencyStats::default());
        assert_eq!(summary.rcode_text, "No Response");
    }

    #[tokio::test]
    async fn progress_reports_stream_per_probe() {
        let addr = spawn_responder(2).await;
        let target = ServerTarget::new(addr.ip(), None, addr.port(), Protocol::Udp);
        let spec = QuerySpec::new("example.com", RecordType::A);
        let mut opts = PingOptions::new(2, Duration::from_secs(2));
        opts.interval = Duration::from_millis(1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = ping(&target, &spec, &opts, &Shutdown::disabled(), Some(tx))
            .await
            .unwrap();
        assert_eq!(summary.sent, 2);

        let mut seqs = Vec::new();
        while let Some(report) = rx.recv().await {
            assert!(matches!(report.outcome, ProbeOutcome::Reply(_)));
            seqs.push(report.seq);
        }
        assert_eq!(seqs, vec![0, 1]);
    }
}
