//! End-to-end runs of the classify and build-index commands on temp files.

use std::fs;
use std::path::Path;

use retrieval_classify::{
    run_build_index, run_classify, BuildIndexArgs, CentroidClassifier, CentroidModel,
    ClassifierKind, ClassifyArgs, LabelCentroid,
};
use retrieval_types::Settings;
use tempfile::TempDir;

fn write_inputs(dir: &Path, ids: &[&str]) {
    fs::write(
        dir.join("d.jsonl"),
        concat!(
            "{\"id\":\"a\",\"vector\":[0.0,0.0]}\n",
            "{\"id\":\"b\",\"vector\":[10.0,0.0]}\n",
            "{\"id\":\"c\",\"vector\":[0.5,0.0]}\n",
            "{\"id\":\"d\",\"vector\":[9.0,0.0]}\n",
        ),
    )
    .unwrap();
    fs::write(dir.join("ids.txt"), ids.join("\n") + "\n").unwrap();

    let model = CentroidModel {
        centroids: vec![
            LabelCentroid {
                label: "left".to_string(),
                vector: vec![0.0, 0.0],
            },
            LabelCentroid {
                label: "right".to_string(),
                vector: vec![10.0, 0.0],
            },
        ],
    };
    fs::write(dir.join("m.json"), serde_json::to_vec(&model).unwrap()).unwrap();
}

fn args(dir: &Path) -> ClassifyArgs {
    ClassifyArgs {
        uuids: dir.join("ids.txt"),
        descriptors: dir.join("d.jsonl"),
        model: dir.join("m.json"),
        classifier: ClassifierKind::Centroid,
        neighbors: 2,
        header_out: dir.join("out/header.csv"),
        out: dir.join("out/data.csv"),
        cache_dir: None,
        overwrite: false,
        fail_fast: false,
        isolated: false,
        extraction_workers: None,
        classification_workers: None,
        progress_every: None,
    }
}

fn small_pools() -> Settings {
    let mut settings = Settings::default();
    settings.parallel.extraction_workers = 2;
    settings.parallel.classification_workers = 3;
    settings
}

fn data_ids(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("out/data.csv"))
        .unwrap()
        .lines()
        .map(|l| l.split(',').next().unwrap().to_string())
        .collect()
}

#[test]
fn test_classify_writes_rows_in_input_order() {
    let dir = TempDir::new().unwrap();
    write_inputs(dir.path(), &["d", "a", "c", "b"]);

    let report = run_classify(&small_pools(), &args(dir.path())).unwrap();
    assert_eq!(report.rows, 4);
    assert_eq!(report.snapshot.processed, 4);
    assert_eq!(report.snapshot.failed, 0);
    assert!(report.failures.is_empty());

    assert_eq!(
        fs::read_to_string(dir.path().join("out/header.csv")).unwrap(),
        "uuid,left,right\n"
    );
    assert_eq!(data_ids(dir.path()), vec!["d", "a", "c", "b"]);
}

#[test]
fn test_missing_descriptor_is_skipped_and_counted() {
    let dir = TempDir::new().unwrap();
    write_inputs(dir.path(), &["a", "ghost", "c"]);

    let report = run_classify(&small_pools(), &args(dir.path())).unwrap();
    assert_eq!(report.rows, 2);
    assert_eq!(report.snapshot.failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("ghost"));
    assert_eq!(data_ids(dir.path()), vec!["a", "c"]);
}

#[test]
fn test_fail_fast_stops_at_first_failure() {
    let dir = TempDir::new().unwrap();
    write_inputs(dir.path(), &["a", "ghost", "c", "d"]);

    let mut args = args(dir.path());
    args.fail_fast = true;
    let mut settings = small_pools();
    retrieval_classify::apply_classify_overrides(&mut settings, &args);

    let err = run_classify(&settings, &args).unwrap_err();
    assert!(err.to_string().contains("ghost"));
    assert_eq!(data_ids(dir.path()), vec!["a"]);
}

#[test]
fn test_cached_results_survive_model_change() {
    let dir = TempDir::new().unwrap();
    write_inputs(dir.path(), &["a"]);
    let mut args = args(dir.path());
    args.cache_dir = Some(dir.path().join("cache").to_string_lossy().into_owned());
    let mut settings = small_pools();
    retrieval_classify::apply_classify_overrides(&mut settings, &args);

    run_classify(&settings, &args).unwrap();
    let first = fs::read_to_string(dir.path().join("out/data.csv")).unwrap();

    // Swap the centroids: a fresh classification would flip the scores.
    let swapped = CentroidModel {
        centroids: vec![
            LabelCentroid {
                label: "left".to_string(),
                vector: vec![10.0, 0.0],
            },
            LabelCentroid {
                label: "right".to_string(),
                vector: vec![0.0, 0.0],
            },
        ],
    };
    fs::write(dir.path().join("m.json"), serde_json::to_vec(&swapped).unwrap()).unwrap();

    run_classify(&settings, &args).unwrap();
    let cached = fs::read_to_string(dir.path().join("out/data.csv")).unwrap();
    assert_eq!(first, cached);

    settings.classify_overwrite = true;
    run_classify(&settings, &args).unwrap();
    let recomputed = fs::read_to_string(dir.path().join("out/data.csv")).unwrap();
    assert_ne!(first, recomputed);
}

#[test]
fn test_knn_classifier_run() {
    let dir = TempDir::new().unwrap();
    write_inputs(dir.path(), &["a", "b"]);
    fs::write(
        dir.path().join("train.jsonl"),
        concat!(
            "{\"id\":\"t1\",\"label\":\"left\",\"vector\":[0.1,0.0]}\n",
            "{\"id\":\"t2\",\"label\":\"left\",\"vector\":[0.2,0.0]}\n",
            "{\"id\":\"t3\",\"label\":\"right\",\"vector\":[9.9,0.0]}\n",
            "{\"id\":\"t4\",\"label\":\"right\",\"vector\":[9.8,0.0]}\n",
        ),
    )
    .unwrap();

    let mut args = args(dir.path());
    args.classifier = ClassifierKind::Knn;
    args.model = dir.path().join("train.jsonl");

    let report = run_classify(&small_pools(), &args).unwrap();
    assert_eq!(report.rows, 2);

    let data = fs::read_to_string(dir.path().join("out/data.csv")).unwrap();
    let rows: Vec<&str> = data.lines().collect();
    assert_eq!(rows, vec!["a,1,0", "b,0,1"]);
}

#[test]
fn test_model_can_be_trained_and_loaded() {
    let dir = TempDir::new().unwrap();
    let trained = CentroidClassifier::train(vec![
        ("x".to_string(), vec![1.0, 1.0]),
        ("x".to_string(), vec![3.0, 3.0]),
    ])
    .unwrap();
    let path = dir.path().join("trained.json");
    fs::write(&path, serde_json::to_vec(&trained.to_model()).unwrap()).unwrap();
    let loaded = CentroidClassifier::load(&path).unwrap();
    assert_eq!(loaded.to_model().centroids[0].vector, vec![2.0, 2.0]);
}

#[test]
fn test_build_index_update_and_query() {
    let dir = TempDir::new().unwrap();
    write_inputs(dir.path(), &[]);
    fs::write(
        dir.path().join("more.jsonl"),
        "{\"id\":\"e\",\"vector\":[0.1,0.0]}\n{\"id\":\"a\",\"vector\":[5.0,0.0]}\n",
    )
    .unwrap();

    let report = run_build_index(
        &Settings::default(),
        &BuildIndexArgs {
            descriptors: dir.path().join("d.jsonl"),
            update: vec![dir.path().join("more.jsonl")],
            algorithm: Some("flat".to_string()),
            index_path: None,
            query: Some("c".to_string()),
            n: 2,
        },
    )
    .unwrap();

    assert_eq!(report.algorithm, "flat");
    assert_eq!(report.count, 5);
    let ids: Vec<String> = report.neighbors.iter().map(|n| n.id.to_string()).collect();
    assert_eq!(ids, vec!["c", "e"]);
}

#[test]
fn test_build_index_unknown_algorithm() {
    let dir = TempDir::new().unwrap();
    write_inputs(dir.path(), &[]);
    let result = run_build_index(
        &Settings::default(),
        &BuildIndexArgs {
            descriptors: dir.path().join("d.jsonl"),
            update: vec![],
            algorithm: Some("annoy".to_string()),
            index_path: None,
            query: None,
            n: 1,
        },
    );
    assert!(result.is_err());
}
