//! Persistence tests: a reloaded index must answer queries exactly like the
//! index that was saved.

use smallworld::Hnsw;
use tempfile::TempDir;

fn random_vectors(count: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..count)
        .map(|_| (0..dim).map(|_| rng.f32() * 2.0 - 1.0).collect())
        .collect()
}

fn build_index(count: usize, dim: usize, seed: u64) -> Hnsw {
    let mut index = Hnsw::new();
    for (i, v) in random_vectors(count, dim, seed).into_iter().enumerate() {
        index
            .insert(v, Some(serde_json::json!({"n": i})))
            .unwrap();
    }
    index
}

#[test]
fn test_persisted_queries_identical() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("index.swl");

    let index = build_index(500, 16, 77);
    index.save(&path).unwrap();
    let loaded = Hnsw::load(&path).unwrap();

    for query in random_vectors(50, 16, 101) {
        let before = index.search(&query, 10).unwrap();
        let after = loaded.search(&query, 10).unwrap();

        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.distance.to_bits(), b.distance.to_bits());
            assert_eq!(a.vector, b.vector);
            assert_eq!(a.metadata, b.metadata);
        }
    }
}

#[test]
fn test_persisted_queries_identical_across_ef() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("index.swl");

    let index = build_index(200, 8, 13);
    index.save(&path).unwrap();
    let loaded = Hnsw::load(&path).unwrap();

    let query = random_vectors(1, 8, 5).remove(0);
    for ef in [1, 4, 32, 128, 400] {
        for k in [1, 5, 20] {
            let before = index.search_with_ef(&query, k, ef).unwrap();
            let after = loaded.search_with_ef(&query, k, ef).unwrap();
            assert_eq!(before, after, "diverged at ef={} k={}", ef, k);
        }
    }
}

#[test]
fn test_loaded_index_accepts_more_inserts() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("index.swl");

    let index = build_index(50, 4, 9);
    index.save(&path).unwrap();

    let mut loaded = Hnsw::load(&path).unwrap();
    assert_eq!(loaded.len(), 50);

    // Ids keep counting from where the saved index stopped
    let id = loaded.insert(vec![0.1, 0.2, 0.3, 0.4], None).unwrap();
    assert_eq!(id, 50);

    // The dimension survives the round trip
    let err = loaded.insert(vec![0.1, 0.2], None).unwrap_err();
    assert!(matches!(
        err,
        smallworld::Error::WrongDimension { expected: 4, got: 2 }
    ));

    let results = loaded.search(&[0.1, 0.2, 0.3, 0.4], 1).unwrap();
    assert_eq!(results[0].id, 50);
    assert!(results[0].distance < 1e-6);
}

#[test]
fn test_save_overwrites_existing_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("index.swl");

    build_index(30, 4, 1).save(&path).unwrap();
    let bigger = build_index(60, 4, 2);
    bigger.save(&path).unwrap();

    let loaded = Hnsw::load(&path).unwrap();
    assert_eq!(loaded.len(), 60);
    assert_eq!(loaded.entry_point(), bigger.entry_point());
}

#[test]
fn test_save_leaves_no_temp_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("index.swl");

    build_index(10, 4, 1).save(&path).unwrap();

    let names: Vec<String> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["index.swl".to_string()]);
}
