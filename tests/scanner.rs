use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use findme::{
    BoundingBox, CancelToken, DetectedFace, Embedding, FailureReason, FaceEncoder,
    MatchStrategy, RunConfiguration, ScanError, Scanner,
};

/// What the fake encoder does for one candidate path.
#[derive(Clone)]
enum Behavior {
    Faces(Vec<DetectedFace>),
    Fail(&'static str),
    Panic,
    Sleep(Duration, Vec<DetectedFace>),
}

struct FakeEncoder {
    reference: Option<Embedding>,
    candidates: HashMap<PathBuf, Behavior>,
    calls: AtomicUsize,
}

impl FakeEncoder {
    fn new(candidates: Vec<(&str, Behavior)>) -> Self {
        Self {
            reference: Some(reference()),
            candidates: candidates
                .into_iter()
                .map(|(p, b)| (PathBuf::from(p), b))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FaceEncoder for FakeEncoder {
    fn encode_reference(&self, _path: &Path) -> Result<Embedding> {
        self.reference
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no face detected"))
    }

    fn detect_faces(&self, path: &Path) -> Result<Vec<DetectedFace>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.candidates.get(path) {
            Some(Behavior::Faces(f)) => Ok(f.clone()),
            Some(Behavior::Fail(msg)) => Err(anyhow::anyhow!(*msg)),
            Some(Behavior::Panic) => panic!("detector crashed"),
            Some(Behavior::Sleep(d, f)) => {
                std::thread::sleep(*d);
                Ok(f.clone())
            }
            None => anyhow::bail!("unknown candidate {}", path.display()),
        }
    }
}

fn reference() -> Embedding {
    Embedding(vec![1.0, 0.0])
}

fn face(side: u32, distance: f32) -> DetectedFace {
    let cos = 1.0 - distance;
    DetectedFace {
        bbox: BoundingBox {
            x: 5,
            y: 5,
            width: side,
            height: side,
        },
        embedding: Embedding(vec![cos, (1.0 - cos * cos).max(0.0).sqrt()]),
    }
}

fn paths(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(PathBuf::from).collect()
}

fn config(workers: usize) -> RunConfiguration {
    RunConfiguration {
        workers,
        ..RunConfiguration::default()
    }
}

fn assert_close(actual: Option<f32>, expected: f32) {
    let actual = actual.expect("expected a distance");
    assert!(
        (actual - expected).abs() < 1e-5,
        "distance {} != {}",
        actual,
        expected
    );
}

#[test]
fn four_candidate_scenario() {
    let encoder = FakeEncoder::new(vec![
        ("a.jpg", Behavior::Faces(vec![face(40, 0.30)])),
        ("b.jpg", Behavior::Faces(vec![face(10, 0.05)])),
        ("c.jpg", Behavior::Faces(vec![])),
        ("d.jpg", Behavior::Fail("corrupt file")),
    ]);
    let scanner = Scanner::new(Arc::new(encoder), config(1));

    let report = scanner
        .scan(Path::new("selfie.jpg"), &paths(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]))
        .unwrap();

    assert_eq!(report.scanned_count, 4);
    assert_eq!(report.matched_count, 1);
    assert_eq!(report.failed_count, 1);
    assert!(!report.cancelled);

    let [a, b, c, d] = &report.results[..] else {
        panic!("expected four results");
    };
    assert!(a.matched);
    assert_close(a.best_distance, 0.30);
    assert_eq!(a.evaluated_faces, 1);

    assert!(!b.matched);
    assert_eq!(b.evaluated_faces, 0);
    assert_eq!(b.best_distance, None);
    assert!(b.failure.is_none());

    assert!(!c.matched);
    assert_eq!(c.evaluated_faces, 0);
    assert!(c.failure.is_none());

    assert!(!d.matched);
    assert_eq!(d.evaluated_faces, 0);
    assert!(matches!(
        d.failure.as_ref().map(|f| &f.reason),
        Some(FailureReason::Encoder(msg)) if msg.contains("corrupt file")
    ));
}

#[test]
fn results_follow_input_order_with_workers() {
    let names: Vec<String> = (0..24).map(|i| format!("img{:02}.png", i)).collect();
    let behaviors = names
        .iter()
        .enumerate()
        .map(|(i, n)| {
            // later inputs finish first
            let delay = Duration::from_millis(((24 - i) % 5) as u64 * 3);
            let d = if i % 3 == 0 { 0.2 } else { 0.8 };
            (n.as_str(), Behavior::Sleep(delay, vec![face(50, d)]))
        })
        .collect();
    let encoder = FakeEncoder::new(behaviors);
    let candidates: Vec<PathBuf> = names.iter().map(PathBuf::from).collect();

    let sequential = Scanner::new(Arc::new(FakeEncoder::new(
        names
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let d = if i % 3 == 0 { 0.2 } else { 0.8 };
                (n.as_str(), Behavior::Faces(vec![face(50, d)]))
            })
            .collect(),
    )), config(1))
    .scan(Path::new("selfie.jpg"), &candidates)
    .unwrap();

    let parallel = Scanner::new(Arc::new(encoder), config(6))
        .scan(Path::new("selfie.jpg"), &candidates)
        .unwrap();

    assert_eq!(parallel.results.len(), candidates.len());
    for (i, r) in parallel.results.iter().enumerate() {
        assert_eq!(r.path, candidates[i]);
        assert_eq!(r.candidate, names[i]);
    }
    let seq: Vec<_> = sequential.results.iter().map(|r| (r.matched, r.best_distance)).collect();
    let par: Vec<_> = parallel.results.iter().map(|r| (r.matched, r.best_distance)).collect();
    assert_eq!(seq, par);
    assert_eq!(parallel.matched_count, 8);
}

#[test]
fn one_bad_candidate_does_not_disturb_the_rest() {
    let good = vec![
        ("1.jpg", Behavior::Faces(vec![face(40, 0.1)])),
        ("2.jpg", Behavior::Faces(vec![face(40, 0.9)])),
        ("3.jpg", Behavior::Faces(vec![face(40, 0.45)])),
    ];
    let mut with_bad = good.clone();
    with_bad.insert(1, ("bad.jpg", Behavior::Panic));

    let clean = Scanner::new(Arc::new(FakeEncoder::new(good)), config(2))
        .scan(Path::new("s.jpg"), &paths(&["1.jpg", "2.jpg", "3.jpg"]))
        .unwrap();
    let dirty = Scanner::new(Arc::new(FakeEncoder::new(with_bad)), config(2))
        .scan(Path::new("s.jpg"), &paths(&["1.jpg", "bad.jpg", "2.jpg", "3.jpg"]))
        .unwrap();

    assert_eq!(dirty.scanned_count, 4);
    assert_eq!(dirty.failed_count, 1);
    assert!(matches!(
        dirty.results[1].failure.as_ref().map(|f| &f.reason),
        Some(FailureReason::Panicked(msg)) if msg == "detector crashed"
    ));

    let kept: Vec<_> = dirty
        .results
        .iter()
        .filter(|r| r.failure.is_none())
        .cloned()
        .collect();
    assert_eq!(kept, clean.results);
    assert_eq!(dirty.matched_count, clean.matched_count);
}

#[test]
fn reference_failure_aborts_the_run() {
    let mut encoder = FakeEncoder::new(vec![("a.jpg", Behavior::Faces(vec![face(40, 0.1)]))]);
    encoder.reference = None;
    let encoder = Arc::new(encoder);
    let scanner = Scanner::new(Arc::clone(&encoder), config(1));

    let err = scanner
        .scan(Path::new("selfie.jpg"), &paths(&["a.jpg"]))
        .unwrap_err();
    match err {
        ScanError::ReferenceEncodingFailed { path, source } => {
            assert_eq!(path, PathBuf::from("selfie.jpg"));
            assert!(source.to_string().contains("no face detected"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn degenerate_reference_aborts_the_run() {
    for bad in [vec![0.0, 0.0], vec![f32::NAN, 1.0]] {
        let mut encoder =
            FakeEncoder::new(vec![("a.jpg", Behavior::Faces(vec![face(40, 0.1)]))]);
        encoder.reference = Some(Embedding(bad.clone()));
        let encoder = Arc::new(encoder);
        let scanner = Scanner::new(Arc::clone(&encoder), config(1));

        let err = scanner
            .scan(Path::new("selfie.jpg"), &paths(&["a.jpg"]))
            .unwrap_err();
        match err {
            ScanError::ReferenceEncodingFailed { path, source } => {
                assert_eq!(path, PathBuf::from("selfie.jpg"));
                assert!(
                    source.to_string().contains("non-finite norm"),
                    "unexpected source for {:?}: {}",
                    bad,
                    source
                );
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn empty_candidate_set_is_rejected_up_front() {
    let scanner = Scanner::new(Arc::new(FakeEncoder::new(vec![])), config(1));
    assert!(matches!(
        scanner.scan(Path::new("selfie.jpg"), &[]),
        Err(ScanError::NoCandidates)
    ));
}

#[test]
fn invalid_configuration_is_rejected_up_front() {
    let cfg = RunConfiguration {
        tolerance: 2.0,
        ..RunConfiguration::default()
    };
    let scanner = Scanner::new(Arc::new(FakeEncoder::new(vec![])), cfg);
    assert!(matches!(
        scanner.scan(Path::new("selfie.jpg"), &paths(&["a.jpg"])),
        Err(ScanError::Config(_))
    ));
}

#[test]
fn dimension_mismatch_is_a_candidate_failure() {
    let mut odd = face(40, 0.1);
    odd.embedding = Embedding(vec![1.0, 0.0, 0.0]);
    let encoder = FakeEncoder::new(vec![
        ("odd.jpg", Behavior::Faces(vec![odd])),
        ("ok.jpg", Behavior::Faces(vec![face(40, 0.1)])),
    ]);
    let report = Scanner::new(Arc::new(encoder), config(1))
        .scan(Path::new("s.jpg"), &paths(&["odd.jpg", "ok.jpg"]))
        .unwrap();

    assert_eq!(report.scanned_count, 2);
    assert_eq!(report.matched_count, 1);
    assert!(matches!(
        report.results[0].failure.as_ref().map(|f| &f.reason),
        Some(FailureReason::Metric(_))
    ));
}

#[test]
fn slow_candidate_times_out() {
    let encoder = FakeEncoder::new(vec![
        ("slow.jpg", Behavior::Sleep(Duration::from_millis(500), vec![face(40, 0.1)])),
        ("fast.jpg", Behavior::Faces(vec![face(40, 0.1)])),
    ]);
    let cfg = RunConfiguration {
        candidate_timeout: Some(Duration::from_millis(50)),
        ..RunConfiguration::default()
    };
    let report = Scanner::new(Arc::new(encoder), cfg)
        .scan(Path::new("s.jpg"), &paths(&["slow.jpg", "fast.jpg"]))
        .unwrap();

    assert_eq!(report.scanned_count, 2);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.matched_count, 1);
    assert!(matches!(
        report.results[0].failure.as_ref().map(|f| &f.reason),
        Some(FailureReason::Timeout(d)) if *d == Duration::from_millis(50)
    ));
    assert!(report.results[1].matched);
}

#[test]
fn cancellation_keeps_completed_results() {
    let names = ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"];
    let encoder = FakeEncoder::new(
        names
            .iter()
            .map(|n| (*n, Behavior::Faces(vec![face(40, 0.2)])))
            .collect(),
    );
    let encoder = Arc::new(encoder);
    let scanner = Scanner::new(Arc::clone(&encoder), config(1));
    let cancel = CancelToken::new();

    let report = scanner
        .scan_with(Path::new("s.jpg"), &paths(&names), &cancel, |_, done, _| {
            if done == 2 {
                cancel.cancel();
            }
        })
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.scanned_count, 2);
    assert_eq!(report.matched_count, 2);
    assert_eq!(report.results[0].candidate, "a.jpg");
    assert_eq!(report.results[1].candidate, "b.jpg");
    assert_eq!(encoder.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn progress_callback_sees_every_candidate() {
    let names = ["a.jpg", "b.jpg", "c.jpg"];
    let encoder = FakeEncoder::new(
        names
            .iter()
            .map(|n| (*n, Behavior::Faces(vec![face(40, 0.7)])))
            .collect(),
    );
    let mut seen = Vec::new();
    let report = Scanner::new(Arc::new(encoder), config(3))
        .scan_with(Path::new("s.jpg"), &paths(&names), &CancelToken::new(), |r, done, total| {
            assert_eq!(total, 3);
            seen.push((r.candidate.clone(), done));
        })
        .unwrap();

    assert_eq!(report.scanned_count, 3);
    assert_eq!(seen.len(), 3);
    let mut dones: Vec<usize> = seen.iter().map(|(_, d)| *d).collect();
    dones.sort();
    assert_eq!(dones, vec![1, 2, 3]);
}

#[test]
fn exhaustive_strategy_reports_closest_face() {
    let faces = vec![face(40, 0.45), face(40, 0.15)];
    let early = Scanner::new(
        Arc::new(FakeEncoder::new(vec![("g.jpg", Behavior::Faces(faces.clone()))])),
        config(1),
    )
    .scan(Path::new("s.jpg"), &paths(&["g.jpg"]))
    .unwrap();
    let full = Scanner::new(
        Arc::new(FakeEncoder::new(vec![("g.jpg", Behavior::Faces(faces))])),
        RunConfiguration {
            strategy: MatchStrategy::Exhaustive,
            ..RunConfiguration::default()
        },
    )
    .scan(Path::new("s.jpg"), &paths(&["g.jpg"]))
    .unwrap();

    assert_close(early.results[0].best_distance, 0.45);
    assert_eq!(early.results[0].evaluated_faces, 1);
    assert_close(full.results[0].best_distance, 0.15);
    assert_eq!(full.results[0].evaluated_faces, 2);
}

#[test]
fn reruns_are_identical() {
    let make = || {
        FakeEncoder::new(vec![
            ("x.jpg", Behavior::Faces(vec![face(30, 0.33), face(30, 0.2)])),
            ("y.jpg", Behavior::Faces(vec![face(12, 0.01), face(64, 0.61)])),
        ])
    };
    let candidates = paths(&["x.jpg", "y.jpg"]);
    let first = Scanner::new(Arc::new(make()), config(2))
        .scan(Path::new("s.jpg"), &candidates)
        .unwrap();
    let second = Scanner::new(Arc::new(make()), config(2))
        .scan(Path::new("s.jpg"), &candidates)
        .unwrap();
    assert_eq!(first.results, second.results);
}
