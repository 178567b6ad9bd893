//! Batch scanning of candidate images against one reference face.
//!
//! The scanner owns the run: it encodes the reference once, runs every
//! candidate through the encoder and the matcher, isolates per-candidate
//! failures and assembles the report in input order. With more than one
//! worker, candidates are pulled from a shared cursor by scoped threads and
//! results are slotted back by index, so completion order never leaks into
//! the report.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};

use crate::config::RunConfiguration;
use crate::discover::candidate_name;
use crate::error::{FailureReason, ScanError};
use crate::filter::DetectedFace;
use crate::matcher;
use crate::metric::{cosine_distance, Embedding};
use crate::report::{MatchResult, RunReport};

/// Source of face embeddings. Detection, alignment and the recognition
/// model all live behind this trait.
pub trait FaceEncoder: Send + Sync + 'static {
    /// Embed the single face of a reference portrait. Must fail when the
    /// image holds no usable face.
    fn encode_reference(&self, path: &Path) -> anyhow::Result<Embedding>;

    /// Detect and embed every face in a candidate image. Finding no face is
    /// `Ok(vec![])`, not an error.
    fn detect_faces(&self, path: &Path) -> anyhow::Result<Vec<DetectedFace>>;
}

/// Cooperative cancellation for a running scan. Candidates already handed
/// to the encoder finish; nothing new is scheduled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Scanner<E> {
    encoder: Arc<E>,
    config: RunConfiguration,
}

impl<E: FaceEncoder> Scanner<E> {
    pub fn new(encoder: Arc<E>, config: RunConfiguration) -> Self {
        Self { encoder, config }
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub fn scan(&self, reference: &Path, candidates: &[PathBuf]) -> Result<RunReport, ScanError> {
        self.scan_with(reference, candidates, &CancelToken::new(), |_, _, _| {})
    }

    /// Scan with cancellation and a progress callback. `on_result` runs on
    /// the calling thread once per finished candidate, in completion order,
    /// with the number done so far and the total.
    pub fn scan_with<F>(
        &self,
        reference: &Path,
        candidates: &[PathBuf],
        cancel: &CancelToken,
        mut on_result: F,
    ) -> Result<RunReport, ScanError>
    where
        F: FnMut(&MatchResult, usize, usize),
    {
        self.config.validate()?;
        if candidates.is_empty() {
            return Err(ScanError::NoCandidates);
        }

        let start = Instant::now();
        let total = candidates.len();
        info!(
            "Scanning {} image(s) | tolerance {:.2} | min face {}px | {:?} | {} worker(s)",
            total,
            self.config.tolerance,
            self.config.min_face_size,
            self.config.strategy,
            self.config.workers
        );

        let reference_embedding = self.encode_reference(reference)?;
        info!("Reference encoded ({} dims)", reference_embedding.len());

        let mut slots: Vec<Option<MatchResult>> = vec![None; total];
        let mut done = 0usize;
        let mut record = |index: usize, result: MatchResult| {
            done += 1;
            on_result(&result, done, total);
            slots[index] = Some(result);
        };

        let workers = self.config.workers.min(total);
        if workers <= 1 {
            for (index, path) in candidates.iter().enumerate() {
                if cancel.is_cancelled() {
                    break;
                }
                record(index, self.scan_one(&reference_embedding, path));
            }
        } else {
            let cursor = AtomicUsize::new(0);
            let (tx, rx) = mpsc::channel::<(usize, MatchResult)>();

            thread::scope(|s| {
                for _ in 0..workers {
                    let tx = tx.clone();
                    let cursor = &cursor;
                    let reference_embedding = &reference_embedding;
                    s.spawn(move || loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let index = cursor.fetch_add(1, Ordering::SeqCst);
                        let Some(path) = candidates.get(index) else {
                            break;
                        };
                        let result = self.scan_one(reference_embedding, path);
                        if tx.send((index, result)).is_err() {
                            break;
                        }
                    });
                }
                drop(tx);

                for (index, result) in rx {
                    record(index, result);
                }
            });
        }

        let results: Vec<MatchResult> = slots.into_iter().flatten().collect();
        let cancelled = results.len() < total;
        let report = RunReport::new(results, start.elapsed(), cancelled);

        if cancelled {
            warn!(
                "Scan cancelled after {} of {} image(s)",
                report.scanned_count, total
            );
        }
        info!(
            "Scanned {} image(s) in {:.2}s: {} match(es), {} failure(s)",
            report.scanned_count,
            report.elapsed.as_secs_f64(),
            report.matched_count,
            report.failed_count
        );
        Ok(report)
    }

    fn encode_reference(&self, path: &Path) -> Result<Embedding, ScanError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.encoder.encode_reference(path)
        }))
        .unwrap_or_else(|payload| {
            Err(anyhow::anyhow!(
                "encoder panicked: {}",
                panic_message(payload.as_ref())
            ))
        });

        let failed = |source: anyhow::Error| ScanError::ReferenceEncodingFailed {
            path: path.to_path_buf(),
            source,
        };
        let embedding = outcome.map_err(failed)?;
        if embedding.is_empty() {
            return Err(failed(anyhow::anyhow!("encoder returned an empty embedding")));
        }
        // every comparison would fail on a zero or non-finite reference
        cosine_distance(embedding.as_slice(), embedding.as_slice())
            .map_err(|e| failed(anyhow::anyhow!("unusable reference embedding: {}", e)))?;
        Ok(embedding)
    }

    fn scan_one(&self, reference: &Embedding, path: &Path) -> MatchResult {
        let name = candidate_name(path);

        let faces = match self.detect(path) {
            Ok(faces) => faces,
            Err(reason) => {
                warn!("Skipping {}: {}", name, reason);
                return MatchResult::failed(name, path.to_path_buf(), reason.into());
            }
        };
        debug!("{}: {} face(s) detected", name, faces.len());

        match matcher::evaluate(reference, &faces, &self.config) {
            Ok(m) => {
                if let Some(face) = m.best_face.filter(|_| m.matched) {
                    info!(
                        "MATCH: {} (Dist: {:.3} | Size: {}x{})",
                        name,
                        m.best_distance.unwrap_or_default(),
                        face.width,
                        face.height
                    );
                }
                MatchResult::evaluated(name, path.to_path_buf(), m)
            }
            Err(e) => {
                warn!("Skipping {}: {}", name, e);
                MatchResult::failed(name, path.to_path_buf(), FailureReason::from(e).into())
            }
        }
    }

    /// Run the encoder for one candidate, bounded by the configured timeout.
    /// A timed-out call is abandoned on its own thread.
    fn detect(&self, path: &Path) -> Result<Vec<DetectedFace>, FailureReason> {
        let Some(limit) = self.config.candidate_timeout else {
            return guarded_detect(self.encoder.as_ref(), path);
        };

        let (tx, rx) = mpsc::sync_channel(1);
        let encoder = Arc::clone(&self.encoder);
        let owned = path.to_path_buf();
        thread::Builder::new()
            .name("findme-encode".into())
            .spawn(move || {
                let _ = tx.send(guarded_detect(encoder.as_ref(), &owned));
            })
            .map_err(|e| FailureReason::Encoder(format!("spawning encoder thread: {}", e)))?;

        match rx.recv_timeout(limit) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    "{}: encoder still running after {:?}, its session stays busy until it returns",
                    candidate_name(path),
                    limit
                );
                Err(FailureReason::Timeout(limit))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(FailureReason::Panicked("encoder thread exited".into()))
            }
        }
    }
}

fn guarded_detect<E: FaceEncoder>(
    encoder: &E,
    path: &Path,
) -> Result<Vec<DetectedFace>, FailureReason> {
    match panic::catch_unwind(AssertUnwindSafe(|| encoder.detect_faces(path))) {
        Ok(Ok(faces)) => Ok(faces),
        Ok(Err(e)) => Err(FailureReason::Encoder(format!("{:#}", e))),
        Err(payload) => Err(FailureReason::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
