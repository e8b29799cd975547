//! A gateway is a single logical endpoint with several attachment points. A connection through it
//! is denied when any attachment point denies it, regardless of direction.

use calico_policy_core::{
    ConnectionContext, Direction, Effect, EvaluationConfig, Labels, Protocol, Reason,
};
use calico_policy_test::{engine, init_tracing, labels, pod, read_fixture, tcp};

fn through_gateway(port: u16) -> Vec<ConnectionContext> {
    let gateway = pod([10, 0, 1, 1], labels([("role", "gateway")]));
    let client = pod([10, 0, 0, 1], Labels::default());
    let server = pod([10, 0, 2, 1], Labels::default());

    let mut hops = vec![
        tcp(Direction::Ingress, client, gateway.clone()),
        tcp(Direction::Egress, gateway, server),
    ];
    for hop in &mut hops {
        hop.destination.port = Some(port);
    }
    hops
}

#[test]
fn deny_at_any_attachment_point_wins() {
    let _tracing = init_tracing();
    let (engine, _index) = engine(EvaluationConfig::default(), &read_fixture("gateway.yaml"));

    let hops = through_gateway(80);
    assert!(engine.evaluate(&hops[0]).is_allowed());
    assert_eq!(engine.evaluate(&hops[1]).action, Effect::Deny);

    let decision = engine.evaluate_path(&hops);
    assert_eq!(decision.action, Effect::Deny);
    match &decision.reason {
        Reason::Rule(rule) => {
            assert_eq!(rule.tier, "gateway");
            assert_eq!(rule.direction, Direction::Egress);
            assert_eq!(rule.index, 1);
        }
        reason => panic!("unexpected reason: {}", reason),
    }
    assert_eq!(decision.logged.len(), 1);

    // The order in which attachment points are visited does not matter.
    let reversed = hops.into_iter().rev().collect::<Vec<_>>();
    assert_eq!(engine.evaluate_path(&reversed).action, Effect::Deny);
}

#[test]
fn allowed_when_every_attachment_point_allows() {
    let _tracing = init_tracing();
    let (engine, _index) = engine(EvaluationConfig::default(), &read_fixture("gateway.yaml"));

    let decision = engine.evaluate_path(&through_gateway(443));
    assert!(decision.is_allowed());
    assert_eq!(decision.logged.len(), 1);

    let mut udp = through_gateway(80);
    for hop in &mut udp {
        hop.protocol = Protocol::UDP;
    }
    assert!(engine.evaluate_path(&udp).is_allowed());
}

#[test]
fn empty_paths_take_the_default_action() {
    let (engine, _index) = engine(EvaluationConfig::default(), &read_fixture("gateway.yaml"));
    let decision = engine.evaluate_path(&[]);
    assert_eq!(decision.action, Effect::Deny);
    assert_eq!(decision.reason, Reason::EndOfTiers);
}
