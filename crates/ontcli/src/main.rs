//! Router connectivity diagnostic.
//!
//! Walks the same path the control plane takes to reach a router - DNS,
//! TCP, protocol login, identity, resource - one step at a time with
//! escalating timeouts, so an operator can see exactly where reachability
//! breaks. Exit code is 0 iff no step failed.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use owo_colors::OwoColorize;
use rosproto::{Client, DialConfig, ProtoError, Sentence};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

/// TCP connect attempt tiers.
const TCP_TIERS: &[u64] = &[5, 15, 30];
/// Protocol auth attempt tiers.
const AUTH_TIERS: &[u64] = &[10, 30];

/// Diagnose connectivity to one router's management API
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Router hostname or IP address
    host: String,

    /// Management API port
    port: u16,

    /// API username
    user: String,

    /// API password
    secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pass,
    Fail,
    Warn,
    Skip,
}

struct StepResult {
    status: Status,
    label: String,
    detail: String,
}

fn report(results: &mut Vec<StepResult>, status: Status, label: &str, detail: impl Into<String>) {
    let detail = detail.into();
    let tag = match status {
        Status::Pass => "PASS".green().bold().to_string(),
        Status::Fail => "FAIL".red().bold().to_string(),
        Status::Warn => "WARN".yellow().bold().to_string(),
        Status::Skip => "SKIP".bright_black().bold().to_string(),
    };
    println!("  [{tag}] {:<28} {}", label, detail.bright_white());
    results.push(StepResult {
        status,
        label: label.to_string(),
        detail,
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut results = Vec::new();

    println!(
        "{}",
        format!("Diagnosing {}:{}", cli.host, cli.port).bright_cyan().bold()
    );
    println!("{}", "━".repeat(60).bright_black());

    step_dns(&cli, &mut results).await;
    let tcp_ok = step_tcp(&cli, &mut results).await;

    if tcp_ok {
        let client = step_auth(&cli, &mut results).await;
        match client {
            Some(mut client) => {
                step_identity(&mut client, &mut results).await;
                step_resource(&mut client, &mut results).await;
                client.close().await;
            }
            None => {
                report(&mut results, Status::Skip, "identity", "auth did not complete");
                report(&mut results, Status::Skip, "resource", "auth did not complete");
            }
        }
    } else {
        report(&mut results, Status::Skip, "protocol auth", "no TCP connectivity");
        report(&mut results, Status::Skip, "identity", "no TCP connectivity");
        report(&mut results, Status::Skip, "resource", "no TCP connectivity");
    }

    println!("{}", "━".repeat(60).bright_black());
    let fails = results.iter().filter(|r| r.status == Status::Fail).count();
    let warns = results.iter().filter(|r| r.status == Status::Warn).count();
    if fails == 0 {
        println!(
            "{} ({} warnings)",
            "All checks passed".green().bold(),
            warns
        );
        Ok(())
    } else {
        println!("{}", format!("{fails} check(s) failed:").red().bold());
        for step in results.iter().filter(|r| r.status == Status::Fail) {
            println!("  {} {} - {}", "✗".red(), step.label, step.detail);
        }
        std::process::exit(1);
    }
}

/// DNS resolution; skipped for literal IPs.
async fn step_dns(cli: &Cli, results: &mut Vec<StepResult>) {
    if cli.host.parse::<IpAddr>().is_ok() {
        report(results, Status::Skip, "dns resolution", "literal IP address");
        return;
    }
    match lookup_host((cli.host.as_str(), cli.port)).await {
        Ok(addrs) => {
            let addrs: Vec<String> = addrs.take(3).map(|a| a.ip().to_string()).collect();
            if addrs.is_empty() {
                report(results, Status::Fail, "dns resolution", "no addresses returned");
            } else {
                report(results, Status::Pass, "dns resolution", addrs.join(", "));
            }
        }
        Err(e) => report(results, Status::Fail, "dns resolution", e.to_string()),
    }
}

/// TCP connect at escalating timeout tiers. A success at a later tier is a
/// warning: the router answers, but slowly enough to trip the control
/// plane's dial budget.
async fn step_tcp(cli: &Cli, results: &mut Vec<StepResult>) -> bool {
    let addr = format!("{}:{}", cli.host, cli.port);
    for (i, secs) in TCP_TIERS.iter().enumerate() {
        let label = format!("tcp connect ({secs}s)");
        let started = Instant::now();
        match timeout(Duration::from_secs(*secs), TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => {
                let elapsed = started.elapsed().as_millis();
                let status = if i == 0 { Status::Pass } else { Status::Warn };
                report(results, status, &label, format!("connected in {elapsed}ms"));
                for later in &TCP_TIERS[i + 1..] {
                    report(
                        results,
                        Status::Skip,
                        &format!("tcp connect ({later}s)"),
                        "already connected",
                    );
                }
                return true;
            }
            Ok(Err(e)) => {
                // Refused or unreachable; longer timeouts will not help.
                report(results, Status::Fail, &label, e.to_string());
                for later in &TCP_TIERS[i + 1..] {
                    report(
                        results,
                        Status::Skip,
                        &format!("tcp connect ({later}s)"),
                        "connection refused",
                    );
                }
                return false;
            }
            Err(_) => {
                report(results, Status::Fail, &label, format!("timed out after {secs}s"));
            }
        }
    }
    false
}

/// Protocol login at two timeout tiers. A rejection is deterministic, so
/// only timeouts escalate to the next tier.
async fn step_auth(cli: &Cli, results: &mut Vec<StepResult>) -> Option<Client> {
    for (i, secs) in AUTH_TIERS.iter().enumerate() {
        let label = format!("protocol auth ({secs}s)");
        let config = DialConfig {
            connect_timeout: Duration::from_secs(*secs),
            read_timeout: Duration::from_secs(*secs),
        };
        match Client::dial(&cli.host, cli.port, &cli.user, &cli.secret, config).await {
            Ok(client) => {
                let status = if i == 0 { Status::Pass } else { Status::Warn };
                report(results, status, &label, "logged in");
                for later in &AUTH_TIERS[i + 1..] {
                    report(
                        results,
                        Status::Skip,
                        &format!("protocol auth ({later}s)"),
                        "already authenticated",
                    );
                }
                return Some(client);
            }
            Err(ProtoError::LoginRejected(message)) => {
                report(results, Status::Fail, &label, message);
                for later in &AUTH_TIERS[i + 1..] {
                    report(
                        results,
                        Status::Skip,
                        &format!("protocol auth ({later}s)"),
                        "credentials rejected",
                    );
                }
                return None;
            }
            Err(e) => {
                report(results, Status::Fail, &label, e.to_string());
            }
        }
    }
    None
}

async fn step_identity(client: &mut Client, results: &mut Vec<StepResult>) {
    match client.run(&Sentence::command("/system/identity/print")).await {
        Ok(reply) => {
            let name = reply
                .first()
                .map(|row| row.get("name").to_string())
                .unwrap_or_default();
            report(results, Status::Pass, "identity", name);
        }
        Err(e) => report(results, Status::Fail, "identity", e.to_string()),
    }
}

async fn step_resource(client: &mut Client, results: &mut Vec<StepResult>) {
    match client.run(&Sentence::command("/system/resource/print")).await {
        Ok(reply) => {
            let row = reply.first().cloned().unwrap_or_default();
            report(
                results,
                Status::Pass,
                "resource",
                format!(
                    "{} on {} (cpu {}%, uptime {})",
                    row.get("version"),
                    row.get("board-name"),
                    row.get("cpu-load"),
                    row.get("uptime"),
                ),
            );
        }
        Err(e) => report(results, Status::Fail, "resource", e.to_string()),
    }
}
