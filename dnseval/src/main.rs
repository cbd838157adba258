//! dnseval binary entrypoint.
//!
//! Reads the resolver list, fans the prober out through `dnsdiag::eval` and
//! renders either the classic table (buffered, in input order) or
//! line-delimited JSON rows (written as each resolver finishes).

mod cli;

use std::io::{BufRead, Write};
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;

use dnsdiag::error::{DiagError, Result};
use dnsdiag::eval::{evaluate, normalize_server_list, EvalRow};
use dnsdiag::hostname::{system_nameservers, valid_hostname};
use dnsdiag::ping::PingSummary;
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
        return Err(DiagError::InvalidInput(format!(
            "invalid hostname: {}",
            args.hostname
        )));
    }

    let spec = args.query_spec()?;
    let opts = args.eval_options()?;
    let servers = read_server_list(&args)?;
    if servers.is_empty() {
        return Err(DiagError::InvalidInput("no nameserver specified".into()));
    }

    log::debug!("evaluating {} servers", servers.len());
    let mut json_sink = JsonSink::open(args.json.as_deref())?;

    let mut rx = evaluate(servers.clone(), spec, opts, shutdown.clone());
    let mut rows: Vec<EvalRow> = Vec::new();
    while let Some(row) = rx.recv().await {
        if let (Some(sink), Ok(summary)) = (json_sink.as_mut(), &row.result) {
            sink.append(&args.hostname, &row.server, summary)?;
        }
        rows.push(row);
    }

    if json_sink.is_none() {
        rows.sort_by_key(|row| row.index);
        print_table(&args, &servers, &rows);
    }

    Ok(())
}

fn read_server_list(args: &cli::Cli) -> Result<Vec<String>> {
    let lines: Vec<String> = match args.file.as_deref() {
        Some("-") => std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<_>>()?,
        Some(path) => {
            let path = shellexpand::tilde(path).into_owned();
            let content = std::fs::read_to_string(&path)
                .map_err(|e| DiagError::InvalidInput(format!("{}: {}", path, e)))?;
            content.lines().map(str::to_string).collect()
        }
        None => system_nameservers(args.family())?
            .into_iter()
            .map(|ip| ip.to_string())
            .collect(),
    };

    Ok(normalize_server_list(lines))
}

/// Line-delimited JSON writer, either stdout or an append-opened file.
enum JsonSink {
    Stdout,
    File(std::fs::File),
}

impl JsonSink {
    fn open(target: Option<&str>) -> Result<Option<Self>> {
        match target {
            None => Ok(None),
            Some("-") => Ok(Some(JsonSink::Stdout)),
            Some(path) => {
                let path = shellexpand::tilde(path).into_owned();
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|e| DiagError::InvalidInput(format!("{}: {}", path, e)))?;
                Ok(Some(JsonSink::File(file)))
            }
        }
    }

    fn append(&mut self, hostname: &str, server: &str, summary: &PingSummary) -> Result<()> {
        let ttl = summary
            .response
            .as_ref()
            .and_then(|r| r.answer_ttl)
            .map(|t| t.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let flags = summary
            .response
            .as_ref()
            .map(|r| r.flags.to_text())
            .unwrap_or_default();

        let row = serde_json::json!({
            "hostname": hostname,
            "data": {
                "hostname": hostname,
                "timestamp": chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
                "resolver": server,
                "r_min": summary.stats.min,
                "r_avg": summary.stats.avg,
                "r_max": summary.stats.max,
                "r_stddev": summary.stats.stddev,
                "r_lost_percent": summary.lost_percent,
                "s_ttl": ttl,
                "text_flags": flags,
            },
        });

        match self {
            JsonSink::Stdout => {
                println!("{}", row);
                Ok(())
            }
            JsonSink::File(file) => {
                writeln!(file, "{}", row)?;
                Ok(())
            }
        }
    }
}

fn print_table(args: &cli::Cli, servers: &[String], rows: &[EvalRow]) {
    let width = servers.iter().map(String::len).max().unwrap_or(6).max(6);

    println!(
        "{:width$}    avg(ms)     min(ms)     max(ms)     stddev(ms)  lost(%)  ttl        flags",
        "server",
        width = width
    );
    println!("{}", "-".repeat(width + 85));

    for row in rows {
        match &row.result {
            Ok(summary) => {
                let ttl = summary
                    .response
                    .as_ref()
                    .and_then(|r| r.answer_ttl)
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "N/A".to_string());
                let flags = summary
                    .response
                    .as_ref()
                    .map(|r| r.flags.to_text())
                    .unwrap_or_default();

                println!(
                    "{:width$}    {:<8.3}    {:<8.3}    {:<8.3}    {:<8.3}    %{:<3.0}     {:8}  {:>21}",
                    row.server,
                    summary.stats.avg,
                    summary.stats.min,
                    summary.stats.max,
                    summary.stats.stddev,
                    summary.lost_percent,
                    ttl,
                    flags,
                    width = width
                );

                if args.verbose {
                    if let Some(response) = &summary.response {
                        for (i, answer) in response.answers.iter().enumerate() {
                            println!("Answer {} [ {} ]", i + 1, answer);
                        }
                        println!();
                    }
                }
            }
            Err(e) => {
                println!("{:width$}    {}", row.server, e, width = width);
            }
        }
    }
}
