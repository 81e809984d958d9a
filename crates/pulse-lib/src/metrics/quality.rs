use crate::detectors::ppg::PulsePipelineResult;
use crate::signal::stddev;
use serde::{Deserialize, Serialize};

/// Fewest detected beats a measurement may have and still count as GOOD.
pub const MIN_GOOD_PEAKS: usize = 15;
/// Least raw-signal variation (population std) a usable fingertip contact shows.
pub const MIN_SIGNAL_STD: f64 = 5.0;
/// Spike ratio above which the measurement looks motion-contaminated.
const SPIKE_RATIO_STEADY: f64 = 0.05;

/// Acceptance thresholds for the final quality gate.
#[derive(Debug, Clone, Copy)]
pub struct QualityThresholds {
    pub min_good_peaks: usize,
    pub min_signal_std: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_good_peaks: MIN_GOOD_PEAKS,
            min_signal_std: MIN_SIGNAL_STD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Quality {
    Good,
    Poor,
}

/// Remediation hints attached to a POOR verdict; rendering them is the caller's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Advice {
    ImproveContact,
    SteadyPressure,
    EnableFlash,
}

/// Terminal output of a measurement session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub status: Quality,
    /// Heart-rate estimate; only a GOOD measurement reports one.
    pub bpm: Option<f64>,
    pub peak_count: usize,
    /// Population std of the raw brightness values.
    pub signal_std: f64,
    pub rmssd_ms: Option<f64>,
    pub duration_s: f64,
    /// Fraction of successive-difference outliers in the raw signal.
    pub spike_ratio: f64,
    pub advice: Vec<Advice>,
}

/// Classify a completed final pass against the acceptance thresholds.
///
/// `raw` is the buffered brightness series the pass was computed from;
/// the gate judges contact quality on it, not on the normalized copy
/// (which has unit variance by construction).
pub fn assess(
    raw: &[f64],
    result: &PulsePipelineResult,
    duration_s: f64,
    thresholds: &QualityThresholds,
) -> QualityVerdict {
    let signal_std = stddev(raw);
    let spike_ratio = spike_ratio(raw);
    let peak_count = result.events.len();
    let good = peak_count >= thresholds.min_good_peaks && signal_std >= thresholds.min_signal_std;

    let advice = if good {
        Vec::new()
    } else {
        advise(peak_count, signal_std, spike_ratio, thresholds)
    };

    QualityVerdict {
        status: if good { Quality::Good } else { Quality::Poor },
        bpm: if good { Some(result.bpm) } else { None },
        peak_count,
        signal_std,
        rmssd_ms: result.rmssd_ms,
        duration_s,
        spike_ratio,
        advice,
    }
}

fn advise(
    peak_count: usize,
    signal_std: f64,
    spike_ratio: f64,
    thresholds: &QualityThresholds,
) -> Vec<Advice> {
    let mut advice = Vec::new();
    if signal_std < thresholds.min_signal_std {
        advice.push(Advice::ImproveContact);
        advice.push(Advice::EnableFlash);
    }
    if spike_ratio > SPIKE_RATIO_STEADY || peak_count < thresholds.min_good_peaks {
        advice.push(Advice::SteadyPressure);
    }
    advice
}

/// Fraction of successive differences larger than mean + 2σ.
pub fn spike_ratio(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let diffs: Vec<f64> = data.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
    let sd = (diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / diffs.len() as f64).sqrt();
    if sd == 0.0 {
        return 0.0;
    }
    let threshold = mean + 2.0 * sd;
    let spikes = diffs.iter().filter(|&&d| d > threshold).count();
    spikes as f64 / diffs.len() as f64
}
