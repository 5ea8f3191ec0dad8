//! Barrier Integration Tests
//!
//! Fan-in barriers must fire exactly once whatever the arrival order,
//! duplicate deliveries or concurrency of the collectors.

use std::sync::Arc;

use careerflow::core::{BarrierDecision, BarrierSet, Phase, RunContext, RunStage, StageCell};

/// All orderings of `items` (Heap's algorithm)
fn permutations(items: &[&'static str]) -> Vec<Vec<&'static str>> {
    fn heap(k: usize, items: &mut Vec<&'static str>, out: &mut Vec<Vec<&'static str>>) {
        if k <= 1 {
            out.push(items.clone());
            return;
        }
        heap(k - 1, items, out);
        for i in 0..k - 1 {
            if k % 2 == 0 {
                items.swap(i, k - 1);
            } else {
                items.swap(0, k - 1);
            }
            heap(k - 1, items, out);
        }
    }

    let mut items = items.to_vec();
    let mut out = Vec::new();
    heap(items.len(), &mut items, &mut out);
    out
}

#[test]
fn test_fires_once_in_every_arrival_order() {
    let keys = ["match:j1", "match:j2", "match:j3", "match:j4"];
    let orders = permutations(&keys);
    assert_eq!(orders.len(), 24);

    for order in orders {
        let barriers = BarrierSet::new();
        barriers.expect(Phase::Matching, keys).unwrap();

        let mut fired = 0;
        for (i, key) in order.iter().enumerate() {
            // Redeliver every key once, right after its first arrival
            for _ in 0..2 {
                if barriers.arrive(Phase::Matching, key) == BarrierDecision::Fire {
                    fired += 1;
                    assert_eq!(i, keys.len() - 1, "fired early for order {:?}", order);
                }
            }
        }

        assert_eq!(fired, 1, "order {:?}", order);
        assert!(barriers.has_fired(Phase::Matching));
    }
}

#[test]
fn test_arrivals_before_expectation() {
    let barriers = BarrierSet::new();

    // Completions can overtake the declaration
    assert_eq!(
        barriers.arrive(Phase::Parsing, "jd:j1"),
        BarrierDecision::Waiting {
            recorded: 1,
            expected: None
        }
    );
    assert_eq!(
        barriers.arrive(Phase::Parsing, "jd:j2"),
        BarrierDecision::Waiting {
            recorded: 2,
            expected: None
        }
    );

    assert_eq!(
        barriers.expect(Phase::Parsing, ["jd:j1", "jd:j2"]).unwrap(),
        BarrierDecision::Fire
    );
    assert_eq!(barriers.arrive(Phase::Parsing, "jd:j1"), BarrierDecision::Closed);
}

#[test]
fn test_expected_set_is_what_was_dispatched() {
    // Five jobs requested, only two had text to parse
    let barriers = BarrierSet::new();
    barriers
        .expect(Phase::Parsing, ["resume:r1", "jd:j2", "jd:j4"])
        .unwrap();

    assert_eq!(barriers.arrive(Phase::Parsing, "jd:j1"), BarrierDecision::Unexpected);
    assert!(matches!(
        barriers.arrive(Phase::Parsing, "jd:j4"),
        BarrierDecision::Waiting { recorded: 1, .. }
    ));
    assert!(matches!(
        barriers.arrive(Phase::Parsing, "resume:r1"),
        BarrierDecision::Waiting { recorded: 2, .. }
    ));
    assert_eq!(barriers.arrive(Phase::Parsing, "jd:j2"), BarrierDecision::Fire);
    assert_eq!(barriers.recorded(Phase::Parsing).len(), 3);
}

#[test]
fn test_phases_are_independent() {
    let barriers = BarrierSet::new();
    barriers.expect(Phase::Matching, ["match:j1"]).unwrap();

    assert!(barriers.expect(Phase::Matching, ["match:j2"]).is_err());
    assert_eq!(barriers.expected(Phase::Generation), None);
    assert_eq!(barriers.arrive(Phase::Matching, "match:j1"), BarrierDecision::Fire);
    assert!(!barriers.has_fired(Phase::Generation));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_arrivals_fire_once() {
    for _ in 0..20 {
        let context = Arc::new(RunContext::new());
        let keys: Vec<String> = (0..16).map(|i| format!("match:j{}", i)).collect();
        context
            .barriers()
            .expect(Phase::Matching, keys.clone())
            .unwrap();

        let mut tasks = Vec::new();
        for key in keys.iter().chain(keys.iter()) {
            let context = Arc::clone(&context);
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                context.barriers().arrive(Phase::Matching, &key) == BarrierDecision::Fire
            }));
        }

        let mut fired = 0;
        for task in tasks {
            if task.await.unwrap() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_context_merges_lose_nothing() {
    let context = Arc::new(RunContext::new());

    let mut tasks = Vec::new();
    for i in 0..64 {
        let context = Arc::clone(&context);
        tasks.push(tokio::spawn(async move {
            context.merge_into("all_skill_gaps", format!("skill-{}", i % 32));
            context.insert_entry("skill_matches", &format!("j{}", i), i);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut gaps = context.strings("all_skill_gaps");
    gaps.sort();
    gaps.dedup();
    assert_eq!(context.strings("all_skill_gaps").len(), 32);
    assert_eq!(gaps.len(), 32);
    assert_eq!(context.entries("skill_matches").len(), 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stage_advances_once_under_contention() {
    let stage = Arc::new(StageCell::default());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let stage = Arc::clone(&stage);
        tasks.push(tokio::spawn(async move {
            stage
                .advance(RunStage::AwaitingParsing, RunStage::AwaitingMatching)
                .is_ok()
        }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(stage.current(), RunStage::AwaitingMatching);
}
