use imretrieve::EmbeddingStore;
use imretrieve::ranker::{RankError, cosine_distance, rank, rank_ids};
use rand::prelude::*;
use rstest::*;

const DIM: usize = 32;

fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect()
}

#[fixture]
fn rng() -> StdRng {
    StdRng::seed_from_u64(42)
}

#[fixture]
fn store(mut rng: StdRng) -> EmbeddingStore {
    let mut store = EmbeddingStore::new("random", DIM);
    for id in 0..200 {
        store.insert(id, &random_vector(&mut rng, DIM)).unwrap();
    }
    store
}

fn two_dim(rows: &[(i64, [f32; 2])]) -> EmbeddingStore {
    let mut store = EmbeddingStore::new("test", 2);
    for (id, vector) in rows {
        store.insert(*id, vector).unwrap();
    }
    store
}

#[rstest]
fn self_distance_is_zero(mut rng: StdRng) {
    for _ in 0..100 {
        let a = random_vector(&mut rng, DIM);
        assert!(cosine_distance(&a, &a).unwrap() < 1e-6);
    }
}

#[rstest]
fn distance_is_symmetric(mut rng: StdRng) {
    for _ in 0..100 {
        let a = random_vector(&mut rng, DIM);
        let b = random_vector(&mut rng, DIM);
        let d = cosine_distance(&a, &b).unwrap();
        assert_eq!(d, cosine_distance(&b, &a).unwrap());
        assert!((0. ..=2.).contains(&d));
    }
}

#[rstest]
fn distance_ignores_scale(mut rng: StdRng) {
    let a = random_vector(&mut rng, DIM);
    let b = random_vector(&mut rng, DIM);
    let scaled = a.iter().map(|x| x * 1000.).collect::<Vec<_>>();
    let d1 = cosine_distance(&a, &b).unwrap();
    let d2 = cosine_distance(&scaled, &b).unwrap();
    assert!((d1 - d2).abs() < 1e-5);
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(50)]
#[case(200)]
#[case(1000)]
fn result_sorted_and_sized(store: EmbeddingStore, mut rng: StdRng, #[case] n: usize) {
    let query = random_vector(&mut rng, DIM);
    let result = rank(&query, &store, n).unwrap();
    assert_eq!(result.len(), n.min(store.len()));
    assert!(result.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[rstest]
fn top_result_matches_brute_force(store: EmbeddingStore) {
    let query = store.get(77).unwrap().to_vec();
    let result = rank(&query, &store, 1).unwrap();
    assert_eq!(result[0].id, 77);
}

#[rstest]
fn zero_count_returns_nothing(store: EmbeddingStore, mut rng: StdRng) {
    let query = random_vector(&mut rng, DIM);
    assert!(rank(&query, &store, 0).unwrap().is_empty());
}

#[test]
fn exact_matches_keep_store_order() {
    let store = two_dim(&[(1, [1., 0.]), (2, [0., 1.]), (3, [1., 0.])]);
    for _ in 0..100 {
        assert_eq!(rank_ids(&[1., 0.], &store, 2).unwrap(), vec![1, 3]);
    }
}

#[test]
fn identical_entries_never_swap() {
    let mut store = EmbeddingStore::new("test", 3);
    for id in [5, 3, 9, 1, 7] {
        store.insert(id, &[0.5, 0.5, 0.5]).unwrap();
    }
    store.insert(2, &[-1., 0., 0.]).unwrap();
    for _ in 0..20 {
        assert_eq!(rank_ids(&[1., 1., 1.], &store, 10).unwrap(), vec![5, 3, 9, 1, 7, 2]);
    }
}

#[test]
fn empty_store_returns_nothing() {
    let store = EmbeddingStore::new("test", 4);
    assert_eq!(rank_ids(&[1., 2., 3., 4.], &store, 5).unwrap(), Vec::<i64>::new());
}

#[test]
fn dimension_mismatch() {
    let store = two_dim(&[(1, [1., 0.])]);
    assert_eq!(
        rank(&[1., 0., 0.], &store, 1),
        Err(RankError::DimensionMismatch { expected: 2, actual: 3 })
    );
}

#[test]
fn zero_query_is_degenerate() {
    let store = two_dim(&[(1, [1., 0.]), (2, [0., 1.])]);
    assert_eq!(rank(&[0., 0.], &store, 1), Err(RankError::DegenerateVector { id: None }));
}

#[rstest]
#[case::zero([0., 0.])]
#[case::nan([f32::NAN, 1.])]
#[case::inf([1., f32::INFINITY])]
fn zero_count_is_always_empty(#[case] query: [f32; 2]) {
    let store = two_dim(&[(1, [1., 0.]), (2, [0., 1.])]);
    assert_eq!(rank_ids(&query, &store, 0).unwrap(), Vec::<i64>::new());
}

#[rstest]
#[case::nan([f32::NAN, 1.])]
#[case::inf([f32::INFINITY, 1.])]
#[case::neg_inf([1., f32::NEG_INFINITY])]
fn non_finite_query_is_degenerate(#[case] query: [f32; 2]) {
    let store = two_dim(&[(1, [1., 0.]), (2, [0., 1.])]);
    for _ in 0..10 {
        assert_eq!(rank(&query, &store, 2), Err(RankError::DegenerateVector { id: None }));
    }
}
