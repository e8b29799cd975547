//! Evaluations observe exactly one published snapshot, even while the index is updated.

use calico_policy_core::{Effect, EvaluationConfig, Reason};
use calico_policy_test::{engine, ingress, init_tracing, resources, tiered_policies};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time;

#[test]
fn evaluations_never_observe_partial_updates() {
    let _tracing = init_tracing();
    // Either tier-c passes and tier-b denies, or tier-c allows. A torn read would let tier-b
    // allow.
    let passing = tiered_policies(["Pass", "Deny", "Deny"]);
    let allowing = resources(&tiered_policies(["Allow", "Allow", "Allow"]));
    let (engine, index) = engine(EvaluationConfig::default(), &passing);
    let passing = resources(&passing);

    let done = AtomicBool::new(false);
    std::thread::scope(|s| {
        for _ in 0..4 {
            let engine = engine.clone();
            let done = &done;
            s.spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let decision = engine.evaluate(&ingress());
                    let tier = match &decision.reason {
                        Reason::Rule(rule) => rule.tier.clone(),
                        reason => panic!("unexpected reason: {}", reason),
                    };
                    match decision.action {
                        Effect::Deny => assert_eq!(tier, "tier-b"),
                        Effect::Allow => assert_eq!(tier, "tier-c"),
                    }
                }
            });
        }

        for i in 0..200 {
            let update = if i % 2 == 0 { &allowing } else { &passing };
            index.write().reset(update.clone()).unwrap();
        }
        done.store(true, Ordering::Release);
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watchers_are_notified_of_updates() {
    let _tracing = init_tracing();
    let (mut engine, index) = engine(
        EvaluationConfig::default(),
        &tiered_policies(["Deny", "Deny", "Deny"]),
    );
    let reader = engine.clone();

    let watcher = tokio::spawn(async move {
        let mut decisions = Vec::new();
        while engine.changed().await {
            decisions.push(engine.evaluate(&ingress()).action);
        }
        decisions
    });

    tokio::task::yield_now().await;
    index
        .write()
        .reset(resources(&tiered_policies(["Allow", "Deny", "Deny"])))
        .unwrap();
    assert!(reader.evaluate(&ingress()).is_allowed());
    drop(index);

    let decisions = time::timeout(time::Duration::from_secs(5), watcher)
        .await
        .expect("watcher must complete once the index is dropped")
        .expect("watcher must not panic");
    assert_eq!(decisions.last(), Some(&Effect::Allow));
}
