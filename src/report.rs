use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::error::CandidateScanFailed;
use crate::matcher::ImageMatch;

/// Per-candidate outcome, in input order within a report.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub candidate: String,
    pub path: PathBuf,
    pub matched: bool,
    pub best_distance: Option<f32>,
    pub evaluated_faces: usize,
    pub failure: Option<CandidateScanFailed>,
}

impl MatchResult {
    pub fn evaluated(candidate: String, path: PathBuf, m: ImageMatch) -> Self {
        Self {
            candidate,
            path,
            matched: m.matched,
            best_distance: m.best_distance,
            evaluated_faces: m.evaluated_faces,
            failure: None,
        }
    }

    pub fn failed(candidate: String, path: PathBuf, failure: CandidateScanFailed) -> Self {
        Self {
            candidate,
            path,
            matched: false,
            best_distance: None,
            evaluated_faces: 0,
            failure: Some(failure),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub results: Vec<MatchResult>,
    pub matched_count: usize,
    pub scanned_count: usize,
    pub failed_count: usize,
    pub elapsed: Duration,
    /// Set when the run stopped early; `results` holds only completed candidates.
    pub cancelled: bool,
}

impl RunReport {
    /// Build a report whose counts are derived from `results`.
    pub fn new(results: Vec<MatchResult>, elapsed: Duration, cancelled: bool) -> Self {
        let matched_count = results.iter().filter(|r| r.matched).count();
        let failed_count = results.iter().filter(|r| r.is_failure()).count();
        Self {
            scanned_count: results.len(),
            matched_count,
            failed_count,
            results,
            elapsed,
            cancelled,
        }
    }

    pub fn matches(&self) -> impl Iterator<Item = &MatchResult> {
        self.results.iter().filter(|r| r.matched)
    }

    /// Human readable summary: scanned count, elapsed time, matched files.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "================ RESULT ================");
        let _ = writeln!(
            out,
            "Scanned {} images in {:.2} seconds.",
            self.scanned_count,
            self.elapsed.as_secs_f64()
        );
        if self.cancelled {
            let _ = writeln!(out, "Run was cancelled before all images were scanned.");
        }
        if self.failed_count > 0 {
            let _ = writeln!(out, "{} image(s) could not be scanned.", self.failed_count);
        }
        if self.matched_count == 0 {
            let _ = writeln!(out, "No matches found.");
        } else {
            let _ = writeln!(out, "Found {} matching images:", self.matched_count);
            for m in self.matches() {
                match m.best_distance {
                    Some(d) => {
                        let _ = writeln!(out, " - {} (Dist: {:.3})", m.candidate, d);
                    }
                    None => {
                        let _ = writeln!(out, " - {}", m.candidate);
                    }
                }
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&JsonReport::from(self))
    }
}

#[derive(Serialize)]
struct JsonResult<'a> {
    candidate: &'a str,
    path: &'a PathBuf,
    matched: bool,
    best_distance: Option<f32>,
    evaluated_faces: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    scanned: usize,
    matched: usize,
    failed: usize,
    elapsed_secs: f64,
    cancelled: bool,
    results: Vec<JsonResult<'a>>,
}

impl<'a> From<&'a RunReport> for JsonReport<'a> {
    fn from(r: &'a RunReport) -> Self {
        Self {
            scanned: r.scanned_count,
            matched: r.matched_count,
            failed: r.failed_count,
            elapsed_secs: r.elapsed.as_secs_f64(),
            cancelled: r.cancelled,
            results: r
                .results
                .iter()
                .map(|m| JsonResult {
                    candidate: &m.candidate,
                    path: &m.path,
                    matched: m.matched,
                    best_distance: m.best_distance,
                    evaluated_faces: m.evaluated_faces,
                    failure: m.failure.as_ref().map(|f| f.to_string()),
                })
                .collect(),
        }
    }
}
