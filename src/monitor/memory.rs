use sysinfo::System;

use super::ProviderError;

pub struct MemoryMonitor {
    system: System,
}

impl MemoryMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self { system }
    }

    /// Returns used memory as a percentage of total, clamped to 0..=100
    pub fn usage_percent(&mut self) -> Result<f64, ProviderError> {
        self.system.refresh_memory();
        used_percent(self.system.used_memory(), self.system.total_memory())
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn used_percent(used: u64, total: u64) -> Result<f64, ProviderError> {
    if total == 0 {
        return Err(ProviderError::Unavailable("memory totals"));
    }
    Ok((used as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_of_total() {
        assert_eq!(used_percent(512, 1024).unwrap(), 50.0);
        assert_eq!(used_percent(0, 1024).unwrap(), 0.0);
    }

    #[test]
    fn clamps_and_rejects_zero_total() {
        assert_eq!(used_percent(2048, 1024).unwrap(), 100.0);
        assert!(used_percent(1, 0).is_err());
    }
}
