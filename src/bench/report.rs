use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const GIB: f64 = (1u64 << 30) as f64;

/// Wall-clock duration of one completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSample {
    pub iteration: usize,
    pub elapsed: Duration,
}

/// Bytes per second, or `None` for a zero duration.
pub fn rate(bytes: u64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        Some(bytes as f64 / secs)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRate {
    pub iteration: usize,
    pub elapsed: Duration,
    pub bytes_per_sec: Option<f64>,
}

/// Per-iteration and aggregate throughput of the samples that were actually
/// collected. Missing iterations contribute nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputReport {
    pub n_bytes: usize,
    pub iterations: Vec<IterationRate>,
    pub total_bytes: u64,
    pub total_elapsed: Duration,
    pub aggregate_bytes_per_sec: Option<f64>,
}

impl ThroughputReport {
    pub fn from_samples(n_bytes: usize, samples: &[TimingSample]) -> Self {
        let iterations = samples
            .iter()
            .map(|s| IterationRate {
                iteration: s.iteration,
                elapsed: s.elapsed,
                bytes_per_sec: rate(n_bytes as u64, s.elapsed),
            })
            .collect();
        let total_bytes = n_bytes as u64 * samples.len() as u64;
        let total_elapsed: Duration = samples.iter().map(|s| s.elapsed).sum();
        Self {
            n_bytes,
            iterations,
            total_bytes,
            total_elapsed,
            aggregate_bytes_per_sec: rate(total_bytes, total_elapsed),
        }
    }

    pub fn aggregate_gib_per_sec(&self) -> Option<f64> {
        self.aggregate_bytes_per_sec.map(|r| r / GIB)
    }
}

fn fmt_gib(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.3} GiB/s", r / GIB),
        None => "unbounded (zero duration)".to_string(),
    }
}

impl fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.iterations.is_empty() {
            return write!(f, "no transfers of {} bytes completed", self.n_bytes);
        }
        for it in &self.iterations {
            writeln!(
                f,
                "{:>4} {:>12.3?} {}",
                it.iteration,
                it.elapsed,
                fmt_gib(it.bytes_per_sec)
            )?;
        }
        write!(
            f,
            "{} transfers of {} bytes in {:.3?}: {}",
            self.iterations.len(),
            self.n_bytes,
            self.total_elapsed,
            fmt_gib(self.aggregate_bytes_per_sec)
        )
    }
}
