//! Whole-fleet fan-out behavior: aggregates, negative rows, caching.

mod support;

use ontrol::ErrorKind;
use pretty_assertions::assert_eq;
use support::{active_session, dead_router, ont_rule, plane, FakeRouter, FakeState};

#[tokio::test]
async fn fan_out_reads_every_router_and_caches_the_aggregate() {
    let mut state_a = FakeState::named("alpha");
    state_a.nat_rules = vec![ont_rule("*1", "10.0.1.10", "8081")];
    let mut state_b = FakeState::named("bravo");
    state_b.nat_rules = vec![ont_rule("*2", "10.0.2.10", "8082")];
    let mut state_c = FakeState::named("charlie");
    state_c.nat_rules = vec![ont_rule("*3", "10.0.3.10", "8083")];

    let a = FakeRouter::start(state_a).await;
    let b = FakeRouter::start(state_b).await;
    let c = FakeRouter::start(state_c).await;

    let plane = plane(vec![a.router("alpha"), b.router("bravo"), c.router("charlie")]).await;

    let view = plane.fleet.get_all_nat_configs().await;
    assert_eq!(view.len(), 3);

    let alpha = view["alpha"].found().expect("alpha populated");
    assert_eq!(alpha.current_ip, "10.0.1.10");
    assert_eq!(alpha.current_port, "8081");
    assert_eq!(alpha.rule_id, "*1");
    assert_eq!(alpha.tunnel_endpoint, "103.10.20.5:7001");

    let bravo = view["bravo"].found().expect("bravo populated");
    assert_eq!(bravo.current_ip, "10.0.2.10");
    let charlie = view["charlie"].found().expect("charlie populated");
    assert_eq!(charlie.current_port, "8083");

    // Immediate repeat is a cache hit: no further NAT prints reach any
    // device.
    let before = a.command_count("/ip/firewall/nat/print");
    let again = plane.fleet.get_all_nat_configs().await;
    assert_eq!(again, view);
    assert_eq!(a.command_count("/ip/firewall/nat/print"), before);
}

#[tokio::test]
async fn one_dead_router_yields_a_negative_row_and_a_breaker_failure() {
    let mut state_a = FakeState::named("alpha");
    state_a.nat_rules = vec![ont_rule("*1", "10.0.1.10", "8081")];
    let a = FakeRouter::start(state_a).await;
    let c = FakeRouter::start(FakeState::named("charlie")).await;
    let b = dead_router("bravo").await;

    let plane = plane(vec![a.router("alpha"), b, c.router("charlie")]).await;

    let view = plane.fleet.get_all_nat_configs().await;
    assert_eq!(view.len(), 3, "failed branches still occupy their slot");

    assert!(view["alpha"].found().is_some());
    assert!(view["charlie"].found().is_some());

    let failure = view["bravo"].failure().expect("bravo is a negative row");
    assert_eq!(failure.kind, ErrorKind::NetworkUnreachable);
    assert!(!failure.message.is_empty());

    // The breaker saw the final outcome of the retried acquire: one failure.
    let snapshot = plane.breakers.snapshot();
    let bravo = snapshot
        .iter()
        .find(|s| s.router == "bravo")
        .expect("bravo breaker exists");
    assert_eq!(bravo.consecutive_failures, 1);
}

#[tokio::test]
async fn active_clients_fan_out_collects_sessions_per_router() {
    let mut state_a = FakeState::named("alpha");
    state_a.active = vec![
        active_session("ahmadkukun", "10.10.1.2", "pppoe"),
        active_session("budikukun", "10.10.1.3", "pppoe"),
    ];
    let mut state_b = FakeState::named("bravo");
    state_b.active = vec![active_session("sitisukatani", "10.10.2.2", "pppoe")];

    let a = FakeRouter::start(state_a).await;
    let b = FakeRouter::start(state_b).await;
    let plane = plane(vec![a.router("alpha"), b.router("bravo")]).await;

    let view = plane.fleet.get_all_active_clients().await;
    let alpha = view["alpha"].found().expect("alpha sessions");
    assert_eq!(alpha.len(), 2);
    assert_eq!(alpha[0].router, "alpha");
    let bravo = view["bravo"].found().expect("bravo sessions");
    assert_eq!(bravo.len(), 1);
    assert_eq!(bravo[0].username, "sitisukatani");
    assert_eq!(bravo[0].address, "10.10.2.2");
}

#[tokio::test]
async fn connection_tests_report_identity_and_embed_failures() {
    let a = FakeRouter::start(FakeState::named("alpha")).await;
    let b = dead_router("bravo").await;
    let plane = plane(vec![a.router("alpha"), b]).await;

    let view = plane.fleet.test_all_connections().await;

    let alpha = &view["alpha"];
    assert!(alpha.reachable);
    assert_eq!(alpha.identity.as_deref(), Some("alpha"));
    assert!(alpha.error.is_none());

    let bravo = &view["bravo"];
    assert!(!bravo.reachable);
    assert!(bravo.identity.is_none());
    assert!(bravo.error.is_some());
}

#[tokio::test]
async fn single_router_reads_bypass_nothing_but_the_directory() {
    let mut state = FakeState::named("alpha");
    state.active = vec![active_session("budikukun", "10.10.1.3", "pppoe")];
    let a = FakeRouter::start(state).await;
    let plane = plane(vec![a.router("alpha")]).await;

    let config = plane.fleet.nat_config("alpha").await.expect("nat config");
    assert_eq!(config.current_ip, "10.0.0.10");

    let clients = plane.fleet.clients("alpha").await.expect("clients");
    assert_eq!(clients.len(), 1);

    let err = plane.fleet.nat_config("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn missing_ont_rule_is_a_structured_not_found() {
    let mut state = FakeState::named("alpha");
    state.nat_rules = vec![]; // no rule carries the sentinel
    let a = FakeRouter::start(state).await;
    let plane = plane(vec![a.router("alpha")]).await;

    let view = plane.fleet.get_all_nat_configs().await;
    let failure = view["alpha"].failure().expect("negative row");
    assert_eq!(failure.kind, ErrorKind::NotFound);
    assert!(failure.message.contains("remote-ONT"));
}
