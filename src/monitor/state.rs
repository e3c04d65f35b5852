use crate::classifier::Verdict;
use serde::Serialize;
use std::fmt;

/// Where a camera's monitoring loop is within one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorState {
    Idle,
    Capturing,
    Preprocessing,
    Comparing,
    Classified(Verdict),
}

impl MonitorState {
    /// Whether moving from `self` to `next` follows the cycle order.
    ///
    /// Any state may fall back to Idle; that covers capture failures and
    /// comparison errors alike.
    pub fn can_transition_to(&self, next: MonitorState) -> bool {
        use MonitorState::*;
        matches!(
            (self, next),
            (_, Idle)
                | (Idle, Capturing)
                | (Classified(_), Capturing)
                | (Capturing, Preprocessing)
                | (Preprocessing, Comparing)
                | (Comparing, Classified(_))
        )
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::Idle => write!(f, "idle"),
            MonitorState::Capturing => write!(f, "capturing"),
            MonitorState::Preprocessing => write!(f, "preprocessing"),
            MonitorState::Comparing => write!(f, "comparing"),
            MonitorState::Classified(verdict) => write!(f, "classified ({})", verdict),
        }
    }
}

/// What a single monitoring cycle ended with
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Classified { score: f64, verdict: Verdict },
    NoFrame,
    CaptureFailed(String),
    NoBaseline,
    Failed(String),
}

/// Running totals for one camera
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStats {
    pub cycles: u64,
    pub frames_captured: u64,
    pub comparisons: u64,
    pub anomalies: u64,
    pub failures: u64,
    pub skipped: u64,
    pub last_score: Option<f64>,
    pub last_verdict: Option<Verdict>,
}

impl MonitorStats {
    pub(crate) fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Classified { score, verdict } => {
                self.frames_captured += 1;
                self.comparisons += 1;
                if verdict.is_anomaly() {
                    self.anomalies += 1;
                }
                self.last_score = Some(*score);
                self.last_verdict = Some(*verdict);
            }
            CycleOutcome::NoFrame | CycleOutcome::NoBaseline => self.skipped += 1,
            CycleOutcome::CaptureFailed(_) => self.failures += 1,
            CycleOutcome::Failed(_) => {
                self.frames_captured += 1;
                self.failures += 1;
            }
        }
    }

    /// Share of compared frames classified as anomalies
    pub fn anomaly_rate(&self) -> f64 {
        if self.comparisons == 0 {
            0.0
        } else {
            self.anomalies as f64 / self.comparisons as f64
        }
    }
}
