/// Summary of one source since its first successful sample.
///
/// Secondary fields are zero for single-channel sources, and everything is
/// zero until the first success.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub last: f64,
    pub min_secondary: f64,
    pub max_secondary: f64,
    pub avg_secondary: f64,
    pub last_secondary: f64,
}

impl Stats {
    pub fn single(primary: &RunningStats) -> Self {
        Self {
            min: primary.min(),
            max: primary.max(),
            avg: primary.avg(),
            last: primary.last(),
            ..Self::default()
        }
    }

    pub fn dual(primary: &RunningStats, secondary: &RunningStats) -> Self {
        Self {
            min_secondary: secondary.min(),
            max_secondary: secondary.max(),
            avg_secondary: secondary.avg(),
            last_secondary: secondary.last(),
            ..Self::single(primary)
        }
    }
}

/// Min/max/sum/count/last accumulator for one channel.
///
/// The sum keeps the integer part of every sample and the average is the
/// truncated quotient of that sum, so `avg()` is always a whole number.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    min: f64,
    max: f64,
    sum: u64,
    count: u32,
    last: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum = self.sum.wrapping_add(value as u64);
        self.count = self.count.saturating_add(1);
        self.last = value;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn min(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.min }
    }

    pub fn max(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.max }
    }

    pub fn avg(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            (self.sum / u64::from(self.count)) as f64
        }
    }

    pub fn last(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.last }
    }
}
