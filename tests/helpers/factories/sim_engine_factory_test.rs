use crate::engine::errors::MergeError;
use crate::engine::merge::MergeSource;
use crate::test_helpers::factory::Factory;
use crate::test_helpers::sim_engine::MergeBehavior;

#[test]
fn test_sim_engine_hands_out_requests_in_order() {
    let engine = Factory::sim_engine().with_requests(3).create();

    assert!(engine.has_pending_merges());
    let ids: Vec<u64> = std::iter::from_fn(|| engine.next_merge())
        .map(|r| r.id)
        .collect();

    assert_eq!(ids, vec![1, 2, 3]);
    assert!(!engine.has_pending_merges());
    assert_eq!(engine.handed_out(), vec![1, 2, 3]);
}

#[test]
fn test_sim_engine_applies_behaviors() {
    let engine = Factory::sim_engine()
        .with_requests(2)
        .with_behavior(2, MergeBehavior::Abort("obsolete".into()))
        .create();

    let first = engine.next_merge().unwrap();
    let second = engine.next_merge().unwrap();

    assert!(engine.perform_merge(&first).is_ok());
    assert!(matches!(
        engine.perform_merge(&second),
        Err(MergeError::Aborted(_))
    ));
    assert_eq!(engine.performed(), vec![1, 2]);
    assert_eq!(engine.committed(), vec![1]);
    assert_eq!(engine.peak_running(), 1);
}
