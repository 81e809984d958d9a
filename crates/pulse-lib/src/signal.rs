use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Guard added to the standard deviation so a constant signal normalizes to zeros.
pub const NORM_EPSILON: f64 = 1e-8;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("cannot normalize an empty series")]
    EmptySeries,
}

/// One brightness reading stamped with seconds since session start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub elapsed_s: f64,
    pub value: f64,
}

/// Fixed-capacity FIFO of the most recent samples.
///
/// Backed by a pre-allocated arena with a write cursor; once full, each push
/// overwrites the oldest slot instead of growing the storage.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    arena: Vec<Sample>,
    head: usize,
    capacity: usize,
}

impl SampleBuffer {
    /// Capacity is `ceil(duration * rate * 1.5)`: headroom for a frame source
    /// that runs slightly above its nominal rate, without unbounded growth.
    pub fn new(duration_s: f64, sample_rate_hz: f64) -> Self {
        let capacity = (duration_s * sample_rate_hz * 1.5).ceil() as usize;
        Self::with_capacity(capacity)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            arena: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    pub fn push(&mut self, elapsed_s: f64, value: f64) {
        let sample = Sample { elapsed_s, value };
        if self.arena.len() < self.capacity {
            self.arena.push(sample);
        } else {
            self.arena[self.head] = sample;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn oldest(&self) -> Option<&Sample> {
        self.arena.get(self.head % self.arena.len().max(1))
    }

    pub fn newest(&self) -> Option<&Sample> {
        if self.arena.is_empty() {
            None
        } else {
            let idx = (self.head + self.arena.len() - 1) % self.arena.len();
            Some(&self.arena[idx])
        }
    }

    /// Ordered copy of the current contents, oldest first. Readers get their
    /// own storage so later evictions cannot alias into a snapshot.
    pub fn snapshot(&self) -> Vec<Sample> {
        let n = self.arena.len();
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(self.arena[(self.head + i) % n]);
        }
        out
    }

    pub fn values(&self) -> Vec<f64> {
        self.snapshot().iter().map(|s| s.value).collect()
    }

    pub fn elapsed(&self) -> Vec<f64> {
        self.snapshot().iter().map(|s| s.elapsed_s).collect()
    }
}

/// Population standard deviation; zero for an empty series.
pub fn stddev(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    (data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / data.len() as f64).sqrt()
}

/// Zero-mean, unit-variance copy of `data`.
pub fn normalize(data: &[f64]) -> Result<Vec<f64>, SignalError> {
    if data.is_empty() {
        return Err(SignalError::EmptySeries);
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    let sd = stddev(data);
    Ok(data.iter().map(|x| (x - mean) / (sd + NORM_EPSILON)).collect())
}

/// Beat positions as indices into the series they were detected in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Events {
    pub indices: Vec<usize>,
}

impl Events {
    pub fn from_indices(indices: Vec<usize>) -> Self {
        Self { indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Inter-beat intervals (seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbiSeries {
    pub ibi: Vec<f64>,
}

impl IbiSeries {
    pub fn from_events(events: &Events, fs: f64) -> Self {
        let mut ibi = Vec::new();
        for w in events.indices.windows(2) {
            let dt = (w[1] as f64 - w[0] as f64) / fs;
            ibi.push(dt);
        }
        Self { ibi }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_keeps_fifo_order_under_overflow() {
        let mut buf = SampleBuffer::with_capacity(5);
        for i in 0..12 {
            buf.push(i as f64 * 0.1, i as f64);
        }
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.capacity(), 5);
        // 12 appends into capacity 5: the oldest retained is the 8th (0-based 7)
        let snap = buf.snapshot();
        assert_eq!(snap.first().unwrap().value, 7.0);
        assert_eq!(snap.last().unwrap().value, 11.0);
        let values = buf.values();
        assert_eq!(values, vec![7.0, 8.0, 9.0, 10.0, 11.0]);
        assert_eq!(buf.oldest().unwrap().value, 7.0);
        assert_eq!(buf.newest().unwrap().value, 11.0);
    }

    #[test]
    fn buffer_capacity_from_duration_and_rate() {
        let buf = SampleBuffer::new(30.0, 30.0);
        assert_eq!(buf.capacity(), 1350);
        let buf = SampleBuffer::new(1.0, 3.3);
        assert_eq!(buf.capacity(), 5);
    }

    #[test]
    fn buffer_below_capacity_keeps_everything() {
        let mut buf = SampleBuffer::with_capacity(10);
        for i in 0..4 {
            buf.push(i as f64, i as f64 + 100.0);
        }
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.values(), vec![100.0, 101.0, 102.0, 103.0]);
    }

    #[test]
    fn normalize_centers_and_scales() {
        let data: Vec<f64> = (0..200).map(|i| 40.0 + (i as f64 * 0.7).sin() * 9.0).collect();
        let normed = normalize(&data).unwrap();
        assert_eq!(normed.len(), data.len());
        let mean = normed.iter().sum::<f64>() / normed.len() as f64;
        assert!(mean.abs() < 1e-6);
        assert!((stddev(&normed) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_is_idempotent_within_tolerance() {
        let data: Vec<f64> = (0..100).map(|i| (i as f64 * 0.3).cos() * 2.0).collect();
        let once = normalize(&data).unwrap();
        let twice = normalize(&once).unwrap();
        for (a, b) in once.iter().zip(&twice) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn normalize_guards_constant_signal() {
        let normed = normalize(&[3.5; 40]).unwrap();
        assert!(normed.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn normalize_rejects_empty_input() {
        assert!(matches!(normalize(&[]), Err(SignalError::EmptySeries)));
    }

    #[test]
    fn ibi_from_events() {
        let events = Events::from_indices(vec![10, 40, 70, 100]);
        let ibi = IbiSeries::from_events(&events, 30.0);
        assert_eq!(ibi.ibi.len(), 3);
        for dt in &ibi.ibi {
            assert!((dt - 1.0).abs() < 1e-9);
        }
    }
}
