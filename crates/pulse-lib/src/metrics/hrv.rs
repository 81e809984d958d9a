use crate::signal::IbiSeries;
use serde::{Deserialize, Serialize};

/// Time-domain summary of an inter-beat-interval series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IbiStats {
    pub n: usize,
    /// Mean interval (seconds).
    pub mean_s: f64,
    /// Interval standard deviation (seconds).
    pub sdnn_s: f64,
    /// Root mean square of successive interval differences (milliseconds).
    /// `None` with fewer than two intervals.
    pub rmssd_ms: Option<f64>,
}

pub fn ibi_stats(ibi: &IbiSeries) -> IbiStats {
    let n = ibi.ibi.len();
    let mean_s = if n > 0 {
        ibi.ibi.iter().sum::<f64>() / n as f64
    } else {
        0.0
    };
    let sdnn_s = if n > 1 {
        let mean = mean_s;
        (ibi.ibi.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0)).sqrt()
    } else {
        0.0
    };
    let rmssd_ms = if n > 1 {
        let diffs = ibi.ibi.windows(2).map(|w| (w[1] - w[0]).powi(2));
        Some((diffs.sum::<f64>() / (n as f64 - 1.0)).sqrt() * 1000.0)
    } else {
        None
    };

    IbiStats {
        n,
        mean_s,
        sdnn_s,
        rmssd_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_for_regular_intervals() {
        let ibi = IbiSeries {
            ibi: vec![0.8, 0.8, 0.8, 0.8],
        };
        let stats = ibi_stats(&ibi);
        assert_eq!(stats.n, 4);
        assert!((stats.mean_s - 0.8).abs() < 1e-12);
        assert!(stats.sdnn_s.abs() < 1e-12);
        assert!(stats.rmssd_ms.unwrap().abs() < 1e-9);
    }

    #[test]
    fn rmssd_reflects_successive_differences() {
        // diffs are 0.1 and -0.1, so rmssd = sqrt((0.01 + 0.01) / 2) * 1000
        let ibi = IbiSeries {
            ibi: vec![0.8, 0.9, 0.8],
        };
        let stats = ibi_stats(&ibi);
        let expected = (0.02f64 / 2.0).sqrt() * 1000.0;
        assert!((stats.rmssd_ms.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn rmssd_absent_for_single_interval() {
        let ibi = IbiSeries { ibi: vec![0.8] };
        let stats = ibi_stats(&ibi);
        assert!((stats.mean_s - 0.8).abs() < 1e-12);
        assert!(stats.rmssd_ms.is_none());
    }

    #[test]
    fn stats_for_empty_series() {
        let ibi = IbiSeries { ibi: Vec::new() };
        let stats = ibi_stats(&ibi);
        assert_eq!(stats.n, 0);
        assert_eq!(stats.mean_s, 0.0);
        assert!(stats.rmssd_ms.is_none());
    }
}
