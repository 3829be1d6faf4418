//! Benchmarking harness and timing results.

use crate::error::{Result, TuneError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::debug;

/// How a candidate is timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BenchMode {
    /// `warmup` untimed calls, then `rep` individually timed calls; reports
    /// the (0.5, 0.2, 0.8) quantiles.
    #[default]
    Direct,
    /// One untimed capture call, then `rep` timed replays; reports the median.
    GraphReplay,
}

pub const QUANTILES: [f64; 3] = [0.5, 0.2, 0.8];

/// Latency of one candidate in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timing {
    Median(f64),
    Quantiles([f64; 3]),
}

impl Timing {
    /// The failure sentinel, shaped like the timings `mode` produces.
    pub fn failed(mode: BenchMode) -> Self {
        match mode {
            BenchMode::Direct => Timing::Quantiles([f64::INFINITY; 3]),
            BenchMode::GraphReplay => Timing::Median(f64::INFINITY),
        }
    }

    /// The value candidates are compared by.
    pub fn representative(&self) -> f64 {
        match self {
            Timing::Median(ms) => *ms,
            Timing::Quantiles(values) => values[0],
        }
    }

    pub fn is_failure(&self) -> bool {
        self.representative() == f64::INFINITY
    }
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timing::Median(ms) => write!(f, "{ms:.4} ms"),
            Timing::Quantiles([p50, p20, p80]) => {
                write!(f, "[{p50:.4}, {p20:.4}, {p80:.4}] ms")
            }
        }
    }
}

/// Outcome of benchmarking one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    Measured(Timing),
    Failed { reason: String },
}

impl Measurement {
    /// Collapses a failure into the sentinel for comparison.
    pub fn into_timing(self, mode: BenchMode) -> Timing {
        match self {
            Measurement::Measured(timing) => timing,
            Measurement::Failed { .. } => Timing::failed(mode),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Benchmarker {
    pub mode: BenchMode,
    pub warmup: usize,
    pub rep: usize,
}

impl Default for Benchmarker {
    fn default() -> Self {
        Self {
            mode: BenchMode::Direct,
            warmup: 25,
            rep: 100,
        }
    }
}

impl Benchmarker {
    pub fn new(mode: BenchMode, warmup: usize, rep: usize) -> Self {
        Self {
            mode,
            warmup,
            rep: rep.max(1),
        }
    }

    /// Times `call`. Failures that only disqualify this configuration become
    /// `Measurement::Failed`; everything else is returned as an error.
    pub fn measure<F>(&self, call: F) -> Result<Measurement>
    where
        F: FnMut() -> Result<()>,
    {
        match self.run_trials(call) {
            Ok(timing) => Ok(Measurement::Measured(timing)),
            Err(TuneError::Kernel(err)) if err.is_configuration_failure() => {
                debug!(error = %err, "candidate failed during benchmarking");
                Ok(Measurement::Failed {
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    fn run_trials<F>(&self, mut call: F) -> Result<Timing>
    where
        F: FnMut() -> Result<()>,
    {
        let untimed = match self.mode {
            BenchMode::Direct => self.warmup,
            BenchMode::GraphReplay => 1,
        };
        for _ in 0..untimed {
            call()?;
        }

        let mut samples = Vec::with_capacity(self.rep);
        for _ in 0..self.rep {
            let start = Instant::now();
            call()?;
            samples.push(start.elapsed().as_secs_f64() * 1000.0);
        }
        if samples.iter().any(|ms| !ms.is_finite() || *ms < 0.0) {
            return Err(tunecache_kernels::KernelError::Assertion(
                "benchmark produced a non-finite sample".into(),
            )
            .into());
        }
        samples.sort_by(f64::total_cmp);

        Ok(match self.mode {
            BenchMode::Direct => Timing::Quantiles(QUANTILES.map(|q| quantile(&samples, q))),
            BenchMode::GraphReplay => Timing::Median(quantile(&samples, 0.5)),
        })
    }
}

/// Linear-interpolated quantile of sorted, non-empty samples.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Index of the fastest timing; the first minimum wins ties.
pub fn fastest(timings: &[Timing]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, timing) in timings.iter().enumerate() {
        match best {
            Some(current) if timing.representative() >= timings[current].representative() => {}
            Some(_) if timing.representative().is_nan() => {}
            _ => best = Some(idx),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunecache_kernels::KernelError;

    #[test]
    fn direct_mode_runs_warmup_plus_rep_calls() {
        let bench = Benchmarker::new(BenchMode::Direct, 3, 5);
        let mut calls = 0;
        let measurement = bench
            .measure(|| {
                calls += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(calls, 8);
        assert!(matches!(measurement, Measurement::Measured(Timing::Quantiles(_))));
    }

    #[test]
    fn graph_mode_reports_a_median() {
        let bench = Benchmarker::new(BenchMode::GraphReplay, 10, 4);
        let mut calls = 0;
        let measurement = bench
            .measure(|| {
                calls += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(calls, 5);
        assert!(matches!(measurement, Measurement::Measured(Timing::Median(_))));
    }

    #[test]
    fn configuration_failures_become_sentinels() {
        let bench = Benchmarker::new(BenchMode::Direct, 1, 1);
        let measurement = bench
            .measure(|| Err(KernelError::CompileTimeAssertion("BLOCK".into()).into()))
            .unwrap();
        assert!(matches!(measurement, Measurement::Failed { .. }));
        let timing = measurement.into_timing(BenchMode::Direct);
        assert_eq!(timing, Timing::Quantiles([f64::INFINITY; 3]));
        assert!(timing.is_failure());
    }

    #[test]
    fn other_failures_propagate() {
        let bench = Benchmarker::new(BenchMode::GraphReplay, 1, 1);
        let result = bench.measure(|| Err(KernelError::Other(anyhow::anyhow!("device lost")).into()));
        assert!(result.is_err());
    }

    #[test]
    fn quantiles_interpolate() {
        let samples = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&samples, 0.5), 3.0);
        assert!((quantile(&samples, 0.2) - 1.8).abs() < 1e-12);
        assert!((quantile(&samples, 0.8) - 4.2).abs() < 1e-12);
    }

    #[test]
    fn first_minimum_wins() {
        let timings = [
            Timing::Median(3.0),
            Timing::Median(1.0),
            Timing::Median(1.0),
            Timing::Median(f64::INFINITY),
        ];
        assert_eq!(fastest(&timings), Some(1));
        assert_eq!(fastest(&[]), None);
    }

    #[test]
    fn all_failed_still_selects_first() {
        let timings = [Timing::failed(BenchMode::GraphReplay); 2];
        assert_eq!(fastest(&timings), Some(0));
    }
}
