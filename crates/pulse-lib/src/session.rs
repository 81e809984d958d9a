use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detectors::ppg::{self, FilterError, PpgPipelineConfig};
use crate::metrics::quality::{self, QualityThresholds, QualityVerdict, MIN_GOOD_PEAKS, MIN_SIGNAL_STD};
use crate::signal::{normalize, SampleBuffer, SignalError};

/// Samples the buffer must hold before the live monitor starts filtering.
pub const WARMUP_SAMPLES: usize = 60;
/// Samples the final pass requires to run at all.
pub const MIN_SAMPLES: usize = 60;

/// Tunables for one measurement session; passed at construction so parallel
/// sessions with different parameters cannot interfere.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub duration_s: f64,
    pub sample_rate_hz: f64,
    pub min_good_peaks: usize,
    pub min_signal_std: f64,
    /// Live-monitor cadence in samples; `None` derives 2x the sample rate.
    pub live_cadence_samples: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_s: 30.0,
            sample_rate_hz: 30.0,
            min_good_peaks: MIN_GOOD_PEAKS,
            min_signal_std: MIN_SIGNAL_STD,
            live_cadence_samples: None,
        }
    }
}

impl SessionConfig {
    pub fn cadence(&self) -> usize {
        self.live_cadence_samples
            .unwrap_or(((self.sample_rate_hz * 2.0).round() as usize).max(1))
    }

    fn thresholds(&self) -> QualityThresholds {
        QualityThresholds {
            min_good_peaks: self.min_good_peaks,
            min_signal_std: self.min_signal_std,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Acquiring,
    Cancelled,
    DurationElapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Keep feeding samples.
    Continue,
    /// Acquisition is over; call [`Session::finalize`].
    Done,
}

/// Snapshot handed to the display collaborator on each live pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveUpdate {
    pub elapsed_s: Vec<f64>,
    /// Normalized brightness series.
    pub raw: Vec<f64>,
    /// Band-limited series, or the normalized series again when the live
    /// filter pass failed.
    pub filtered: Vec<f64>,
    pub elapsed_total_s: f64,
    pub remaining_s: f64,
}

pub trait LiveSink {
    fn on_update(&mut self, update: &LiveUpdate);
}

/// Sink that drops every update; the default for headless runs.
#[derive(Debug, Default)]
pub struct NullSink;

impl LiveSink for NullSink {
    fn on_update(&mut self, _update: &LiveUpdate) {}
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not enough data collected ({got} samples, need {needed})")]
    InsufficientData { got: usize, needed: usize },
    #[error("final signal processing failed: {0}")]
    Processing(#[from] FilterError),
}

impl From<SignalError> for SessionError {
    fn from(_: SignalError) -> Self {
        SessionError::InsufficientData {
            got: 0,
            needed: MIN_SAMPLES,
        }
    }
}

/// One measurement from first sample to verdict.
///
/// `Idle -> Acquiring -> {Cancelled | DurationElapsed}`, then
/// [`Session::finalize`] runs the quality-gated final pass; its `Result`
/// carries the three terminal outcomes.
pub struct Session {
    config: SessionConfig,
    buffer: SampleBuffer,
    state: SessionState,
    samples_seen: u64,
    started: Option<Instant>,
    sink: Box<dyn LiveSink>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_sink(config, Box::new(NullSink))
    }

    pub fn with_sink(config: SessionConfig, sink: Box<dyn LiveSink>) -> Self {
        let buffer = SampleBuffer::new(config.duration_s, config.sample_rate_hz);
        Self {
            config,
            buffer,
            state: SessionState::Idle,
            samples_seen: 0,
            started: None,
            sink,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn sample_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Stamp a brightness value with wall-clock elapsed time and ingest it.
    pub fn feed_sample(&mut self, value: f64) -> FeedOutcome {
        let started = *self.started.get_or_insert_with(Instant::now);
        let elapsed = started.elapsed().as_secs_f64();
        self.ingest(elapsed, value)
    }

    /// Clock-free ingestion core used by [`Session::feed_sample`], replay,
    /// and tests. `elapsed_s` must be non-decreasing; the acquisition loop
    /// is the sole writer.
    pub fn ingest(&mut self, elapsed_s: f64, value: f64) -> FeedOutcome {
        match self.state {
            SessionState::Idle => self.state = SessionState::Acquiring,
            SessionState::Acquiring => {}
            SessionState::Cancelled | SessionState::DurationElapsed => return FeedOutcome::Done,
        }
        if elapsed_s >= self.config.duration_s {
            self.state = SessionState::DurationElapsed;
            return FeedOutcome::Done;
        }

        self.buffer.push(elapsed_s, value);
        self.samples_seen += 1;
        if self.samples_seen % self.config.cadence() as u64 == 0
            && self.buffer.len() > WARMUP_SAMPLES
        {
            self.live_pass(elapsed_s);
        }
        FeedOutcome::Continue
    }

    /// Cooperative cancel; collected samples stay available to `finalize`.
    pub fn cancel(&mut self) {
        if self.state == SessionState::Acquiring {
            self.state = SessionState::Cancelled;
        }
    }

    fn live_pass(&mut self, elapsed_total_s: f64) {
        let raw = self.buffer.values();
        let normalized = match normalize(&raw) {
            Ok(series) => series,
            Err(_) => return,
        };
        let filtered = match ppg::process(&normalized, self.config.sample_rate_hz, &PpgPipelineConfig::default()) {
            Ok(result) => result.filtered,
            Err(err) => {
                // live feedback must never stall acquisition; show the
                // unfiltered series until the signal settles
                debug!("live filter pass failed ({err}); falling back to normalized series");
                normalized.clone()
            }
        };
        let update = LiveUpdate {
            elapsed_s: self.buffer.elapsed(),
            raw: normalized,
            filtered,
            elapsed_total_s,
            remaining_s: (self.config.duration_s - elapsed_total_s).max(0.0),
        };
        self.sink.on_update(&update);
    }

    /// Final quality-gated pass over everything collected.
    pub fn finalize(self) -> Result<QualityVerdict, SessionError> {
        if self.buffer.len() < MIN_SAMPLES {
            return Err(SessionError::InsufficientData {
                got: self.buffer.len(),
                needed: MIN_SAMPLES,
            });
        }
        let raw = self.buffer.values();
        let normalized = normalize(&raw)?;
        let cfg = PpgPipelineConfig {
            highpass: true,
            lowpass: true,
            highpass_order: 2,
            lowpass_order: 2,
            breathing: None,
            ..PpgPipelineConfig::default()
        };
        let result = ppg::process(&normalized, self.config.sample_rate_hz, &cfg)?;
        let duration_s = self.buffer.newest().map(|s| s.elapsed_s).unwrap_or(0.0);
        Ok(quality::assess(
            &raw,
            &result,
            duration_s,
            &self.config.thresholds(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::quality::Quality;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::cell::RefCell;
    use std::f64::consts::PI;
    use std::rc::Rc;

    const FS: f64 = 30.0;

    #[derive(Clone, Default)]
    struct RecordingSink {
        updates: Rc<RefCell<Vec<LiveUpdate>>>,
    }

    impl LiveSink for RecordingSink {
        fn on_update(&mut self, update: &LiveUpdate) {
            self.updates.borrow_mut().push(update.clone());
        }
    }

    /// Uniform noise with the requested standard deviation.
    fn noise(rng: &mut StdRng, std: f64) -> f64 {
        if std <= 0.0 {
            return 0.0;
        }
        let half_width = std * 3.0f64.sqrt();
        rng.gen_range(-half_width..=half_width)
    }

    fn feed_sinusoid(session: &mut Session, samples: usize, amplitude: f64, noise_std: f64) {
        let mut rng = StdRng::seed_from_u64(7);
        for i in 0..samples {
            let t = i as f64 / FS;
            let value = 120.0 + amplitude * (2.0 * PI * 1.2 * t).sin() + noise(&mut rng, noise_std);
            if session.ingest(t, value) == FeedOutcome::Done {
                break;
            }
        }
    }

    #[test]
    fn finalize_needs_sixty_samples() {
        let mut session = Session::new(SessionConfig::default());
        feed_sinusoid(&mut session, 59, 25.0, 0.0);
        match session.finalize() {
            Err(SessionError::InsufficientData { got: 59, needed: 60 }) => {}
            other => panic!("expected InsufficientData, got {:?}", other.map(|v| v.status)),
        }
    }

    #[test]
    fn finalize_proceeds_at_sixty_samples() {
        let mut session = Session::new(SessionConfig::default());
        feed_sinusoid(&mut session, 60, 25.0, 0.0);
        // 60 samples is 2 seconds: far too few beats for GOOD, but past the gate
        match session.finalize() {
            Ok(verdict) => assert_eq!(verdict.status, Quality::Poor),
            Err(SessionError::Processing(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn full_session_yields_good_verdict() {
        let mut session = Session::new(SessionConfig::default());
        feed_sinusoid(&mut session, 900, 25.0, 8.0);
        let verdict = session.finalize().expect("verdict");
        assert_eq!(verdict.status, Quality::Good);
        let bpm = verdict.bpm.expect("bpm on GOOD");
        assert!((bpm - 72.0).abs() <= 3.0, "bpm off: {bpm}");
        assert!(
            (34..=38).contains(&verdict.peak_count),
            "peak count off: {}",
            verdict.peak_count
        );
        assert!(verdict.signal_std >= 5.0);
        assert!(verdict.advice.is_empty());
    }

    #[test]
    fn near_constant_signal_yields_poor_verdict() {
        let mut session = Session::new(SessionConfig::default());
        let mut rng = StdRng::seed_from_u64(11);
        for i in 0..900 {
            let t = i as f64 / FS;
            if session.ingest(t, 128.0 + noise(&mut rng, 0.2)) == FeedOutcome::Done {
                break;
            }
        }
        let verdict = session.finalize().expect("verdict");
        assert_eq!(verdict.status, Quality::Poor);
        assert!(verdict.signal_std < 5.0);
        assert!(verdict.bpm.is_none());
        assert!(verdict.advice.contains(&crate::metrics::quality::Advice::ImproveContact));
    }

    #[test]
    fn cancellation_keeps_partial_data() {
        let mut session = Session::new(SessionConfig::default());
        // 10 s of valid signal, then a cancel instead of the full 30 s
        feed_sinusoid(&mut session, 300, 25.0, 2.0);
        session.cancel();
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(session.ingest(10.1, 120.0), FeedOutcome::Done);
        let verdict = session.finalize().expect("verdict from partial data");
        // ~12 beats in 10 s: consistent with the data, not an error
        assert!((10..=14).contains(&verdict.peak_count));
    }

    #[test]
    fn duration_elapse_stops_acquisition() {
        let mut session = Session::new(SessionConfig {
            duration_s: 2.0,
            ..SessionConfig::default()
        });
        let mut fed = 0;
        for i in 0..120 {
            let t = i as f64 / FS;
            if session.ingest(t, 120.0) == FeedOutcome::Done {
                break;
            }
            fed += 1;
        }
        assert_eq!(fed, 60);
        assert_eq!(session.state(), SessionState::DurationElapsed);
        assert_eq!(session.sample_count(), 60);
    }

    #[test]
    fn live_monitor_fires_on_cadence_after_warmup() {
        let sink = RecordingSink::default();
        let updates = sink.updates.clone();
        let mut session = Session::with_sink(SessionConfig::default(), Box::new(sink));
        feed_sinusoid(&mut session, 300, 25.0, 0.0);
        // cadence 60: samples 120, 180, 240, 300 qualify (60 fails the warm-up gate)
        assert_eq!(updates.borrow().len(), 4);
        let last = updates.borrow().last().cloned().unwrap();
        assert_eq!(last.raw.len(), 300);
        assert_eq!(last.filtered.len(), 300);
        assert_eq!(last.elapsed_s.len(), 300);
        assert!(last.remaining_s > 0.0);
    }

    #[test]
    fn live_monitor_falls_back_when_filtering_fails() {
        let sink = RecordingSink::default();
        let updates = sink.updates.clone();
        let config = SessionConfig {
            live_cadence_samples: Some(10),
            ..SessionConfig::default()
        };
        let mut session = Session::with_sink(config, Box::new(sink));
        // constant signal normalizes to zeros: the detector finds no beats
        for i in 0..70 {
            session.ingest(i as f64 / FS, 100.0);
        }
        let updates = updates.borrow();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].raw, updates[0].filtered);
    }

    #[test]
    fn cadence_override_is_honored() {
        let sink = RecordingSink::default();
        let updates = sink.updates.clone();
        let config = SessionConfig {
            live_cadence_samples: Some(30),
            ..SessionConfig::default()
        };
        let mut session = Session::with_sink(config, Box::new(sink));
        feed_sinusoid(&mut session, 150, 25.0, 0.0);
        // samples 90, 120, 150 pass both gates
        assert_eq!(updates.borrow().len(), 3);
    }
}
