//! Device resource probes.
//!
//! All probes degrade gracefully: a missing sysfs node or unreadable
//! procfs file yields a neutral value instead of an error, so metric
//! reporting never takes a worker down. The CPU probe blocks for its
//! sample window; callers on the async side wrap it in `spawn_blocking`.

use std::fs;
use std::time::Duration;

use crate::protocol::MetricSnapshot;

/// Window between the two /proc/stat samples.
pub const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Read the aggregate cpu line from /proc/stat.
fn read_cpu_stats() -> Option<Vec<u64>> {
    let text = fs::read_to_string("/proc/stat").ok()?;
    let line = text.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    Some(fields.filter_map(|f| f.parse().ok()).collect())
}

/// CPU load in [0, 1] from two samples [`CPU_SAMPLE_INTERVAL`] apart.
///
/// Blocks for the sample window.
pub fn cpu_load() -> f64 {
    let Some(first) = read_cpu_stats() else {
        return 0.0;
    };
    std::thread::sleep(CPU_SAMPLE_INTERVAL);
    let Some(second) = read_cpu_stats() else {
        return 0.0;
    };
    if first.len() < 5 || second.len() < 5 {
        return 0.0;
    }

    // idle + iowait
    let idle1 = first[3] + first[4];
    let idle2 = second[3] + second[4];
    let total1: u64 = first.iter().sum();
    let total2: u64 = second.iter().sum();

    let total_diff = total2.saturating_sub(total1);
    let idle_diff = idle2.saturating_sub(idle1);
    if total_diff == 0 {
        return 0.0;
    }
    1.0 - idle_diff as f64 / total_diff as f64
}

/// RAM usage percentage in [0, 100] from /proc/meminfo.
pub fn ram_pct() -> f64 {
    let Ok(text) = fs::read_to_string("/proc/meminfo") else {
        return 0.0;
    };

    let field = |name: &str| -> Option<f64> {
        text.lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };

    match (field("MemTotal:"), field("MemAvailable:")) {
        (Some(total), Some(available)) if total > 0.0 => {
            ((1.0 - available / total) * 100.0).clamp(0.0, 100.0)
        }
        _ => 0.0,
    }
}

/// Battery percentage, or -1 when the device has no battery.
pub fn battery_level() -> f64 {
    let Ok(entries) = fs::read_dir("/sys/class/power_supply") else {
        return -1.0;
    };
    for entry in entries.flatten() {
        let capacity = entry.path().join("capacity");
        if let Ok(text) = fs::read_to_string(&capacity) {
            if let Ok(level) = text.trim().parse::<f64>() {
                return level;
            }
        }
    }
    -1.0
}

/// Storage usage percentage of the filesystem holding `path`.
pub fn storage_pct(path: &str) -> f64 {
    let Ok(c_path) = std::ffi::CString::new(path) else {
        return 0.0;
    };
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 || stat.f_blocks == 0 {
        return 0.0;
    }
    let used = stat.f_blocks.saturating_sub(stat.f_bavail) as f64;
    (used / stat.f_blocks as f64 * 100.0).clamp(0.0, 100.0)
}

/// Full metric snapshot. Blocks for the CPU sample window.
pub fn snapshot() -> MetricSnapshot {
    MetricSnapshot {
        cpu_load: cpu_load(),
        ram_pct: ram_pct(),
        battery: battery_level(),
        storage_pct: storage_pct("/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_in_range() {
        let snap = snapshot();
        assert!((0.0..=1.0).contains(&snap.cpu_load));
        assert!((0.0..=100.0).contains(&snap.ram_pct));
        assert!(snap.battery >= -1.0 && snap.battery <= 100.0);
        assert!((0.0..=100.0).contains(&snap.storage_pct));
    }

    #[test]
    fn test_storage_pct_bad_path() {
        assert_eq!(storage_pct("/definitely/not/a/mount\u{0}point"), 0.0);
    }
}
