use calico_policy_core::{Direction, Effect, EvaluationConfig, Labels, Reason};
use calico_policy_test::{engine, init_tracing, labels, pod, read_fixture, tcp};

#[test]
fn labeled_sources_are_blocked() {
    let _tracing = init_tracing();
    let (engine, _index) = engine(EvaluationConfig::default(), &read_fixture("selectors.yaml"));
    let dst = pod([10, 0, 0, 2], Labels::default());

    let labeled = tcp(
        Direction::Ingress,
        pod([10, 0, 0, 1], labels([("test", "True")])),
        dst.clone(),
    );
    let decision = engine.evaluate(&labeled);
    assert_eq!(decision.action, Effect::Deny);
    match decision.reason {
        Reason::Rule(rule) => {
            assert_eq!(rule.policy, "block-test-sources");
            assert_eq!(rule.index, 0);
        }
        reason => panic!("unexpected reason: {}", reason),
    }

    let unlabeled = tcp(
        Direction::Ingress,
        pod([10, 0, 0, 1], Labels::default()),
        dst.clone(),
    );
    assert!(engine.evaluate(&unlabeled).is_allowed());

    // Label values are compared exactly.
    let lowercase = tcp(
        Direction::Ingress,
        pod([10, 0, 0, 1], labels([("test", "true")])),
        dst,
    );
    assert!(engine.evaluate(&lowercase).is_allowed());
}

#[test]
fn negated_selectors_match_the_complement() {
    let _tracing = init_tracing();
    let policy = |criteria: &str| {
        format!(
            "kind: GlobalNetworkPolicy\nmetadata: {{name: p}}\nspec:\n  ingress:\n    - action: Allow\n      source: {{{}: \"role == 'x'\"}}\n",
            criteria
        )
    };
    let (positive, _i0) = engine(EvaluationConfig::default(), &policy("selector"));
    let (negative, _i1) = engine(EvaluationConfig::default(), &policy("notSelector"));

    let label_sets = [
        Labels::default(),
        labels([("role", "x")]),
        labels([("role", "y")]),
        labels([("role", "x"), ("app", "web")]),
        labels([("app", "x")]),
        labels([("role", "X")]),
    ];
    for source in label_sets {
        let ctx = tcp(
            Direction::Ingress,
            pod([10, 0, 0, 1], source.clone()),
            pod([10, 0, 0, 2], Labels::default()),
        );
        assert_ne!(
            positive.evaluate(&ctx).is_allowed(),
            negative.evaluate(&ctx).is_allowed(),
            "labels: {:?}",
            source
        );
    }
}

#[test]
fn policy_selectors_scope_policies() {
    let _tracing = init_tracing();
    let (engine, _index) = engine(
        EvaluationConfig {
            default_action: Effect::Allow,
            ..Default::default()
        },
        r#"
kind: GlobalNetworkPolicy
metadata: {name: isolate-db}
spec:
  selector: app == 'db' && !has(public)
  ingress:
    - action: Allow
      source:
        selector: app in {'api', 'migrations'}
    - action: Deny
"#,
    );

    let db = pod([10, 0, 0, 2], labels([("app", "db")]));
    let web = pod([10, 0, 0, 3], labels([("app", "web")]));
    let api = pod([10, 0, 0, 4], labels([("app", "api")]));

    assert!(engine
        .evaluate(&tcp(Direction::Ingress, api.clone(), db.clone()))
        .is_allowed());
    assert_eq!(
        engine
            .evaluate(&tcp(Direction::Ingress, web.clone(), db))
            .action,
        Effect::Deny
    );

    // The policy does not select web pods, so the default action applies.
    let decision = engine.evaluate(&tcp(Direction::Ingress, api, web));
    assert!(decision.is_allowed());
    assert_eq!(decision.reason, Reason::EndOfTiers);

    let public_db = pod([10, 0, 0, 5], labels([("app", "db"), ("public", "")]));
    assert_eq!(
        engine
            .evaluate(&tcp(
                Direction::Ingress,
                pod([10, 0, 0, 6], Labels::default()),
                public_db
            ))
            .reason,
        Reason::EndOfTiers
    );
}

#[test]
fn namespace_selectors_match_namespace_labels() {
    let _tracing = init_tracing();
    let (engine, _index) = engine(
        EvaluationConfig::default(),
        r#"
kind: GlobalNetworkPolicy
metadata: {name: allow-prod}
spec:
  ingress:
    - action: Allow
      source:
        namespaceSelector: env == 'prod'
"#,
    );

    let dst = pod([10, 0, 0, 2], Labels::default());
    let prod = pod([10, 1, 0, 1], Labels::default()).in_namespace("web", labels([("env", "prod")]));
    let dev = pod([10, 2, 0, 1], Labels::default()).in_namespace("web", labels([("env", "dev")]));
    let host = calico_policy_core::Endpoint::new(std::net::Ipv4Addr::new(192, 168, 0, 1));

    assert!(engine
        .evaluate(&tcp(Direction::Ingress, prod, dst.clone()))
        .is_allowed());
    assert_eq!(
        engine
            .evaluate(&tcp(Direction::Ingress, dev, dst.clone()))
            .action,
        Effect::Deny
    );
    assert_eq!(
        engine.evaluate(&tcp(Direction::Ingress, host, dst)).action,
        Effect::Deny
    );
}
