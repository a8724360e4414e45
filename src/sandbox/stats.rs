//! Resource usage derived from cumulative runtime counters

use crate::core::ResourceUsage;
use crate::sandbox::runtime::RawStats;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Turn one statistics sample into usage figures.
///
/// CPU is the container's share of host CPU time between the previous and
/// current sample; it is zero when either host sample is missing or the
/// host delta is not positive.
pub fn resource_usage(raw: &RawStats) -> ResourceUsage {
    let cpu_delta = raw.cpu_total.saturating_sub(raw.precpu_total) as f64;
    let system_delta = match (raw.system_total, raw.presystem_total) {
        (Some(current), Some(previous)) => current.saturating_sub(previous) as f64,
        _ => 0.0,
    };

    let cpu_percent = if system_delta > 0.0 {
        cpu_delta / system_delta * 100.0
    } else {
        0.0
    };

    let memory_mb = raw.memory_usage.unwrap_or(0) as f64 / BYTES_PER_MB;
    let disk_io_mb = raw.io_service_bytes.iter().sum::<u64>() as f64 / BYTES_PER_MB;

    ResourceUsage {
        cpu_percent,
        memory_mb,
        disk_io_mb,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_percent_from_deltas() {
        let raw = RawStats {
            cpu_total: 3_000,
            precpu_total: 1_000,
            system_total: Some(110_000),
            presystem_total: Some(100_000),
            memory_usage: Some(64 * 1024 * 1024),
            io_service_bytes: vec![1024 * 1024, 3 * 1024 * 1024],
        };
        let usage = resource_usage(&raw);
        assert!((usage.cpu_percent - 20.0).abs() < 1e-9);
        assert!((usage.memory_mb - 64.0).abs() < 1e-9);
        assert!((usage.disk_io_mb - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_counters_yield_zero() {
        let usage = resource_usage(&RawStats::default());
        assert_eq!(usage, ResourceUsage::default());
    }

    #[test]
    fn test_non_positive_system_delta() {
        let raw = RawStats {
            cpu_total: 500,
            precpu_total: 100,
            system_total: Some(100),
            presystem_total: Some(100),
            ..Default::default()
        };
        assert_eq!(resource_usage(&raw).cpu_percent, 0.0);
    }

    #[test]
    fn test_missing_previous_host_sample_yields_zero() {
        let raw = RawStats {
            cpu_total: 5_000_000,
            precpu_total: 1_000_000,
            system_total: Some(900_000_000_000),
            presystem_total: None,
            ..Default::default()
        };
        assert_eq!(resource_usage(&raw).cpu_percent, 0.0);
    }
}
