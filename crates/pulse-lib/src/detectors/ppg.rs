use crate::{
    metrics::hrv::ibi_stats,
    signal::{Events, IbiSeries},
};
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Physiological ceiling used to derive the peak refractory gap.
pub const MAX_BPM: f64 = 220.0;

/// Window (seconds) of the moving-average baseline the peak picker detrends against.
const BASELINE_WINDOW_S: f64 = 0.75;

/// Candidate peaks must clear this fraction of the detrended RMS.
const PEAK_THRESHOLD_SCALE: f64 = 0.5;

/// How the optional breathing-rate estimate is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreathingMethod {
    /// Dominant respiration-band bin of the interpolated instantaneous-rate spectrum.
    Fft,
}

/// Configurable parameters for the PPG filtering + beat detection pass.
#[derive(Debug, Clone, Copy)]
pub struct PpgPipelineConfig {
    /// Apply the high-pass stage (baseline drift removal).
    pub highpass: bool,
    /// Apply the low-pass stage (high-frequency noise removal).
    pub lowpass: bool,
    /// Cascade depth of the high-pass stage.
    pub highpass_order: usize,
    /// Cascade depth of the low-pass stage.
    pub lowpass_order: usize,
    /// High-pass cutoff (Hz).
    pub lowcut_hz: f64,
    /// Low-pass cutoff (Hz).
    pub highcut_hz: f64,
    /// Breathing-rate estimation; `None` skips it.
    pub breathing: Option<BreathingMethod>,
}

impl Default for PpgPipelineConfig {
    fn default() -> Self {
        Self {
            highpass: true,
            lowpass: true,
            highpass_order: 2,
            lowpass_order: 2,
            lowcut_hz: 0.5,
            highcut_hz: 4.0,
            breathing: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("series too short to filter ({got} samples, need at least {needed})")]
    TooFewSamples { got: usize, needed: usize },
    #[error("series contains non-finite values")]
    DegenerateSignal,
    #[error("detected {0} beats, need at least 2 to estimate a rate")]
    TooFewBeats(usize),
}

/// Combined output of one filtering + beat-detection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulsePipelineResult {
    pub sample_rate_hz: f64,
    pub filtered: Vec<f64>,
    pub events: Events,
    pub bpm: f64,
    pub rmssd_ms: Option<f64>,
    pub breathing_hz: Option<f64>,
}

/// Band-limit a normalized series and estimate the pulse rate from its peaks.
///
/// Expects zero-mean input (see [`crate::signal::normalize`]); the filter
/// stages are initialized from the first sample, so a large offset would
/// leak through as a transient.
pub fn process(
    normalized: &[f64],
    sample_rate: f64,
    cfg: &PpgPipelineConfig,
) -> Result<PulsePipelineResult, FilterError> {
    let fs = sample_rate.max(1.0);
    let needed = fs.ceil().max(4.0) as usize;
    if normalized.len() < needed {
        return Err(FilterError::TooFewSamples {
            got: normalized.len(),
            needed,
        });
    }
    if normalized.iter().any(|v| !v.is_finite()) {
        return Err(FilterError::DegenerateSignal);
    }

    let filtered = band_limit(normalized, fs, cfg);
    let peaks = pick_pulse_peaks(&filtered, fs, 60.0 / MAX_BPM);
    if peaks.len() < 2 {
        return Err(FilterError::TooFewBeats(peaks.len()));
    }

    let events = Events::from_indices(peaks);
    let ibi = IbiSeries::from_events(&events, fs);
    let stats = ibi_stats(&ibi);
    let bpm = 60.0 / stats.mean_s;
    let breathing_hz = match cfg.breathing {
        Some(BreathingMethod::Fft) => breathing_rate_fft(&ibi),
        None => None,
    };

    Ok(PulsePipelineResult {
        sample_rate_hz: fs,
        filtered,
        events,
        bpm,
        rmssd_ms: stats.rmssd_ms,
        breathing_hz,
    })
}

fn band_limit(data: &[f64], fs: f64, cfg: &PpgPipelineConfig) -> Vec<f64> {
    let mut out = data.to_vec();
    if cfg.highpass && cfg.lowcut_hz > 0.0 {
        for _ in 0..cfg.highpass_order.max(1) {
            out = single_pole_highpass(&out, fs, cfg.lowcut_hz);
        }
    }
    if cfg.lowpass && cfg.highcut_hz > 0.0 && cfg.highcut_hz < fs * 0.5 {
        for _ in 0..cfg.lowpass_order.max(1) {
            out = single_pole_lowpass(&out, fs, cfg.highcut_hz);
        }
    }
    out
}

fn single_pole_highpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let dt = 1.0 / fs;
    let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff.max(0.01));
    let alpha = rc / (rc + dt);
    let mut out = Vec::with_capacity(data.len());
    let mut prev_y = data[0];
    let mut prev_x = data[0];
    for &x in data {
        let y = alpha * (prev_y + x - prev_x);
        out.push(y);
        prev_y = y;
        prev_x = x;
    }
    out
}

fn single_pole_lowpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let dt = 1.0 / fs;
    let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff.max(0.01));
    let alpha = dt / (rc + dt);
    let mut out = Vec::with_capacity(data.len());
    let mut prev = data[0];
    for &x in data {
        prev = prev + alpha * (x - prev);
        out.push(prev);
    }
    out
}

fn moving_average(data: &[f64], win: usize) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    if win <= 1 {
        return data.to_vec();
    }
    let mut out = vec![0.0; data.len()];
    let mut acc = 0.0;
    for (i, &sample) in data.iter().enumerate() {
        acc += sample;
        if i >= win {
            acc -= data[i - win];
        }
        out[i] = acc / win as f64;
    }
    out
}

/// Local-maximum picker over a moving-average-detrended series.
///
/// A candidate must clear half the detrended RMS and sit at least one
/// refractory gap (`min_gap_s`) after the previously accepted beat.
fn pick_pulse_peaks(data: &[f64], fs: f64, min_gap_s: f64) -> Vec<usize> {
    if data.len() < 3 {
        return Vec::new();
    }
    let min_gap = ((min_gap_s * fs).round() as usize).max(1);
    let win = ((BASELINE_WINDOW_S * fs).round() as usize).max(1);
    let baseline = moving_average(data, win);
    let detrended: Vec<f64> = data.iter().zip(&baseline).map(|(x, b)| x - b).collect();
    let rms = (detrended.iter().map(|y| y * y).sum::<f64>() / detrended.len() as f64).sqrt();
    let threshold = PEAK_THRESHOLD_SCALE * rms;

    let mut peaks: Vec<usize> = Vec::new();
    for i in 1..detrended.len() - 1 {
        let y = detrended[i];
        if y <= threshold || y <= detrended[i - 1] || y < detrended[i + 1] {
            continue;
        }
        if let Some(&last) = peaks.last() {
            if i - last < min_gap {
                continue;
            }
        }
        peaks.push(i);
    }
    peaks
}

/// Dominant respiration-band (0.1–0.5 Hz) frequency of the instantaneous-rate series.
fn breathing_rate_fft(ibi: &IbiSeries) -> Option<f64> {
    const FS_INTERP: f64 = 4.0;
    const BAND: (f64, f64) = (0.1, 0.5);

    let rate = interpolate_rate(ibi, FS_INTERP);
    if rate.len() < 8 {
        return None;
    }
    let mean = rate.iter().sum::<f64>() / rate.len() as f64;
    let mut frame: Vec<f64> = rate.iter().map(|x| x - mean).collect();
    let n = frame.len();
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut spectrum = fft.make_output_vec();
    fft.process(&mut frame, &mut spectrum).ok()?;

    let mut best: Option<(f64, f64)> = None;
    for (k, val) in spectrum.iter().enumerate() {
        let freq = k as f64 * FS_INTERP / n as f64;
        if freq < BAND.0 || freq > BAND.1 {
            continue;
        }
        let power = val.norm_sqr();
        if best.map_or(true, |(_, p)| power > p) {
            best = Some((freq, power));
        }
    }
    best.map(|(freq, _)| freq)
}

/// Step-interpolate instantaneous BPM over the beat timeline.
fn interpolate_rate(ibi: &IbiSeries, fs: f64) -> Vec<f64> {
    let mut times = Vec::new();
    let mut acc = 0.0;
    for interval in &ibi.ibi {
        acc += interval;
        times.push(acc);
    }
    if times.is_empty() {
        return Vec::new();
    }
    let duration = *times.last().unwrap();
    let n = (duration * fs).ceil() as usize;
    let mut rate = Vec::with_capacity(n);
    let mut idx = 0;
    for i in 0..n {
        let t = i as f64 / fs;
        while idx + 1 < times.len() && times[idx] < t {
            idx += 1;
        }
        let delta = if idx == 0 { ibi.ibi[0] } else { ibi.ibi[idx] };
        let value = if delta == 0.0 { 60.0 } else { 60.0 / delta };
        rate.push(value);
    }
    rate
}
