//! Classification E2E tests: identifier list in, CSV header and rows out.

use std::fs;

use pretty_assertions::assert_eq;

use e2e_tests::{clustered_descriptors, non_empty_file, TestHarness};
use retrieval_classify::{
    run_classify, CentroidClassifier, ClassifierKind, ClassifyArgs,
};
use retrieval_types::{Descriptor, Settings};

fn centers() -> Vec<Vec<f32>> {
    vec![vec![0.0, 0.0, 0.0], vec![20.0, 0.0, 0.0], vec![0.0, 20.0, 0.0]]
}

fn classify_args(harness: &TestHarness, model: &str, kind: ClassifierKind) -> ClassifyArgs {
    ClassifyArgs {
        uuids: harness.path("ids.txt"),
        descriptors: harness.path("descriptors.jsonl"),
        model: harness.path(model),
        classifier: kind,
        neighbors: 3,
        header_out: harness.path("results/header.csv"),
        out: harness.path("results/data.csv"),
        cache_dir: None,
        overwrite: false,
        fail_fast: false,
        isolated: true,
        extraction_workers: Some(3),
        classification_workers: Some(5),
        progress_every: Some(25),
    }
}

/// Writes the query set and returns each query's true cluster, in id-list order.
fn setup(harness: &TestHarness) -> Vec<usize> {
    let labelled = clustered_descriptors(&centers(), 40, 1.0, 77);
    let descriptors: Vec<Descriptor> = labelled.iter().map(|(_, d)| d.clone()).collect();
    harness.write_descriptors("descriptors.jsonl", &descriptors);

    // Reverse order so output order cannot follow file order by accident.
    let ids: Vec<String> = descriptors.iter().rev().map(|d| d.id.to_string()).collect();
    harness.write_ids("ids.txt", &ids);

    let training: Vec<(String, Vec<f32>)> = labelled
        .iter()
        .map(|(label, d)| (format!("cluster{label}"), d.vector.clone()))
        .collect();
    let model = CentroidClassifier::train(training).unwrap().to_model();
    harness.write_json("model.json", &model);

    let mut lines = String::new();
    for (label, d) in &labelled {
        lines.push_str(
            &serde_json::json!({
                "id": format!("train-{}", d.id),
                "label": format!("cluster{label}"),
                "vector": d.vector,
            })
            .to_string(),
        );
        lines.push('\n');
    }
    fs::write(harness.path("train.jsonl"), lines).unwrap();

    labelled.iter().rev().map(|(label, _)| *label).collect()
}

fn best_labels(harness: &TestHarness) -> Vec<(String, usize)> {
    let header = fs::read_to_string(harness.path("results/header.csv")).unwrap();
    let labels: Vec<String> = header.trim().split(',').skip(1).map(String::from).collect();
    fs::read_to_string(harness.path("results/data.csv"))
        .unwrap()
        .lines()
        .map(|line| {
            let mut fields = line.split(',');
            let id = fields.next().unwrap().to_string();
            let scores: Vec<f64> = fields.map(|f| f.parse().unwrap()).collect();
            assert_eq!(scores.len(), labels.len());
            let best = scores
                .iter()
                .enumerate()
                .fold(0, |best, (i, s)| if *s > scores[best] { i } else { best });
            (id, best)
        })
        .collect()
}

#[test]
fn test_centroid_classification_end_to_end() {
    let harness = TestHarness::new();
    let truth = setup(&harness);
    let mut settings = Settings::default();
    let args = classify_args(&harness, "model.json", ClassifierKind::Centroid);
    retrieval_classify::apply_classify_overrides(&mut settings, &args);

    let report = run_classify(&settings, &args).unwrap();
    assert_eq!(report.rows, 120);
    assert_eq!(report.snapshot.total, Some(120));
    assert!(non_empty_file(&harness.path("results/header.csv")));

    let header = fs::read_to_string(harness.path("results/header.csv")).unwrap();
    assert_eq!(header, "uuid,cluster0,cluster1,cluster2\n");

    let rows = best_labels(&harness);
    let predicted: Vec<usize> = rows.iter().map(|(_, best)| *best).collect();
    assert_eq!(predicted, truth);
}

#[test]
fn test_knn_classification_end_to_end() {
    let harness = TestHarness::new();
    let truth = setup(&harness);
    let mut settings = Settings::default();
    settings.index.algorithm = "lsh".to_string();
    let args = classify_args(&harness, "train.jsonl", ClassifierKind::Knn);
    retrieval_classify::apply_classify_overrides(&mut settings, &args);

    let report = run_classify(&settings, &args).unwrap();
    assert_eq!(report.rows, 120);

    let predicted: Vec<usize> = best_labels(&harness).iter().map(|(_, b)| *b).collect();
    assert_eq!(predicted, truth);
}
