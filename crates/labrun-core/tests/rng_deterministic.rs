use labrun_core::rng::{seeded_shuffle, SUBMISSION_SEED};

#[test]
fn shuffle_is_reproducible() {
    let mut a: Vec<u64> = (0..100).collect();
    let mut b: Vec<u64> = (0..100).collect();
    seeded_shuffle(&mut a, SUBMISSION_SEED);
    seeded_shuffle(&mut b, SUBMISSION_SEED);
    assert_eq!(a, b);
}

#[test]
fn shuffle_permutes_without_loss() {
    let mut items: Vec<u64> = (0..64).collect();
    seeded_shuffle(&mut items, SUBMISSION_SEED);
    assert_ne!(items, (0..64).collect::<Vec<_>>());
    items.sort_unstable();
    assert_eq!(items, (0..64).collect::<Vec<_>>());
}
