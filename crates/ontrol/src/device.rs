//! Typed device commands over a raw protocol client.
//!
//! The command strings and property lists here are bit-exact to the router's
//! syntax; nothing else in the crate builds sentences directly.

use rosproto::{Client, ProtoError, Row, Sentence};

use crate::types::{ActiveSubscriber, NatRule, RouterResources};
use std::collections::HashMap;

/// Property list requested for NAT rules. Order mirrors the device docs;
/// the reply is keyed, so only the set matters.
const NAT_PROPLIST: &[&str] = &[
    ".id",
    "chain",
    "action",
    "src-address",
    "dst-address",
    "src-port",
    "dst-port",
    "to-addresses",
    "to-ports",
    "protocol",
    "comment",
    "disabled",
    "bytes",
    "packets",
];

const PPP_ACTIVE_PROPLIST: &[&str] = &["name", "address", "caller-id", "uptime", "encoding", "service"];

const PPP_SECRET_PROPLIST: &[&str] = &["name", "profile"];

/// `/system/identity/print` → the router's configured name.
pub async fn identity(client: &mut Client) -> Result<String, ProtoError> {
    let reply = client.run(&Sentence::command("/system/identity/print")).await?;
    Ok(reply
        .first()
        .map(|row| row.get("name").to_string())
        .unwrap_or_default())
}

/// `/system/resource/print` → version, board and load figures.
pub async fn resources(client: &mut Client) -> Result<RouterResources, ProtoError> {
    let reply = client.run(&Sentence::command("/system/resource/print")).await?;
    let row = reply.first().cloned().unwrap_or_default();
    Ok(RouterResources {
        version: row.get("version").to_string(),
        board_name: row.get("board-name").to_string(),
        platform: row.get("platform").to_string(),
        architecture_name: row.get("architecture-name").to_string(),
        cpu: row.get("cpu").to_string(),
        cpu_count: row.get("cpu-count").to_string(),
        cpu_load_percent: parse_percent(row.get("cpu-load")),
        total_memory_bytes: row.get_i64("total-memory"),
        free_memory_bytes: row.get_i64("free-memory"),
        uptime: row.get("uptime").to_string(),
    })
}

/// `/ip/firewall/nat/print` with the full property list.
pub async fn nat_rules(client: &mut Client) -> Result<Vec<NatRule>, ProtoError> {
    let sentence = Sentence::command("/ip/firewall/nat/print").proplist(NAT_PROPLIST);
    let reply = client.run(&sentence).await?;
    Ok(reply.rows.iter().map(nat_rule_from_row).collect())
}

/// `/ip/firewall/nat/set` of the rewrite target only. The chain, action,
/// matchers and comment are never touched.
pub async fn set_nat_target(
    client: &mut Client,
    rule_id: &str,
    to_addresses: &str,
    to_ports: &str,
) -> Result<(), ProtoError> {
    let sentence = Sentence::command("/ip/firewall/nat/set")
        .attribute(".id", rule_id)
        .attribute("to-addresses", to_addresses)
        .attribute("to-ports", to_ports);
    client.run(&sentence).await?;
    Ok(())
}

/// `/ppp/active/print`, optionally filtered to one exact username.
pub async fn ppp_active(
    client: &mut Client,
    router_name: &str,
    exact_name: Option<&str>,
) -> Result<Vec<ActiveSubscriber>, ProtoError> {
    let mut sentence = Sentence::command("/ppp/active/print").proplist(PPP_ACTIVE_PROPLIST);
    if let Some(name) = exact_name {
        sentence = sentence.query("name", name);
    }
    let reply = client.run(&sentence).await?;
    Ok(reply
        .rows
        .iter()
        .map(|row| ActiveSubscriber {
            router: router_name.to_string(),
            username: row.get("name").to_string(),
            address: row.get("address").to_string(),
            caller_id: row.get("caller-id").to_string(),
            uptime: row.get("uptime").to_string(),
            encoding: row.get("encoding").to_string(),
            service: row.get("service").to_string(),
        })
        .collect())
}

/// `/ppp/secret/print` → username to configured profile.
pub async fn ppp_secret_profiles(
    client: &mut Client,
) -> Result<HashMap<String, String>, ProtoError> {
    let sentence = Sentence::command("/ppp/secret/print").proplist(PPP_SECRET_PROPLIST);
    let reply = client.run(&sentence).await?;
    Ok(reply
        .rows
        .iter()
        .map(|row| (row.get("name").to_string(), row.get("profile").to_string()))
        .collect())
}

fn nat_rule_from_row(row: &Row) -> NatRule {
    NatRule {
        id: row.get(".id").to_string(),
        chain: row.get("chain").to_string(),
        action: row.get("action").to_string(),
        src_address: row.get("src-address").to_string(),
        dst_address: row.get("dst-address").to_string(),
        src_port: row.get("src-port").to_string(),
        dst_port: row.get("dst-port").to_string(),
        to_addresses: row.get("to-addresses").to_string(),
        to_ports: row.get("to-ports").to_string(),
        protocol: row.get("protocol").to_string(),
        comment: row.get("comment").to_string(),
        disabled: row.get("disabled") == "true",
        bytes: row.get_i64("bytes"),
        packets: row.get_i64("packets"),
    }
}

/// The device reports cpu-load as a bare number, some builds append `%`.
fn parse_percent(raw: &str) -> f64 {
    raw.trim().trim_end_matches('%').parse().unwrap_or(0.0)
}
