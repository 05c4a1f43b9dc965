use hdrhistogram::Histogram;
use serde::Serialize;

/// Significant figures kept by the percentile histogram.
const HIST_SIGFIG: u8 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DistributionSnapshot {
    pub count: u64,
    pub mean: f64,
    pub min: u64,
    pub max: u64,
    pub p95: f64,
    pub p99: f64,
    pub stddev: f64,
}

/// Running summary of observed values. Count, min, max, mean and standard
/// deviation are exact; percentiles come from an auto-resizing HdrHistogram.
pub struct Distribution {
    histogram: Histogram<u64>,
    count: u64,
    min: u64,
    max: u64,
    mean: f64,
    // sum of squared deviations from the mean (Welford)
    m2: f64,
}

impl Distribution {
    pub fn new() -> Self {
        Self {
            histogram: Histogram::<u64>::new(HIST_SIGFIG).expect("histogram creation"),
            count: 0,
            min: u64::MAX,
            max: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    pub fn update(&mut self, value: u64) {
        if let Err(err) = self.histogram.record(value) {
            tracing::warn!(value, "value not tracked by percentile histogram: {}", err);
        }

        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        let sample = value as f64;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample - self.mean);
    }

    pub fn snapshot(&self) -> DistributionSnapshot {
        if self.count == 0 {
            return DistributionSnapshot::default();
        }

        DistributionSnapshot {
            count: self.count,
            mean: self.mean,
            min: self.min,
            max: self.max,
            p95: self.histogram.value_at_quantile(0.95) as f64,
            p99: self.histogram.value_at_quantile(0.99) as f64,
            stddev: (self.m2 / self.count as f64).sqrt(),
        }
    }
}

impl Default for Distribution {
    fn default() -> Self {
        Self::new()
    }
}
