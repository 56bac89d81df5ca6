//! CPU, memory, disk and hostname probes.

/// Aggregate CPU utilization since boot, in percent.
///
/// Reads the first line of `/proc/stat` and computes
/// `(total - idle) / total`. Returns 0.0 where the proc interface is
/// unavailable.
pub fn cpu_usage() -> f64 {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/stat")
            .ok()
            .and_then(|data| parse_proc_stat(&data))
            .unwrap_or(0.0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        0.0
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_stat(data: &str) -> Option<f64> {
    let line = data.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
    if values.len() < 4 {
        return None;
    }
    let total: u64 = values.iter().sum();
    // Field 4 of the cpu line is idle time.
    let idle = values[3];
    if total == 0 {
        return None;
    }
    Some((total - idle) as f64 / total as f64 * 100.0)
}

/// Memory utilization in percent, from `MemTotal` and `MemAvailable`.
pub fn memory_usage() -> f64 {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|data| parse_meminfo(&data))
            .unwrap_or(0.0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        0.0
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo(data: &str) -> Option<f64> {
    let mut total = 0u64;
    let mut available = 0u64;
    for line in data.lines() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("MemTotal:") => total = fields.next()?.parse().ok()?,
            Some("MemAvailable:") => available = fields.next()?.parse().ok()?,
            _ => {}
        }
    }
    if total == 0 {
        return None;
    }
    Some((total.saturating_sub(available)) as f64 / total as f64 * 100.0)
}

/// Used fraction of the root filesystem, in percent.
pub fn disk_usage() -> f64 {
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: statvfs fills the zeroed struct on success; the path is a
    // valid nul-terminated literal.
    let rc = unsafe { libc::statvfs(c"/".as_ptr(), &mut stat) };
    if rc != 0 {
        return 0.0;
    }
    let total = stat.f_blocks as u64 * stat.f_frsize as u64;
    let free = stat.f_bfree as u64 * stat.f_frsize as u64;
    if total == 0 {
        return 0.0;
    }
    (total - free) as f64 / total as f64 * 100.0
}

/// Kernel hostname, empty string when unavailable.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: gethostname writes a nul-terminated name into the buffer
    // bounds we hand it.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return String::new();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proc_stat_parses_aggregate_line() {
        let data = "cpu  100 0 100 700 50 0 50 0 0 0\ncpu0 50 0 50 350 25 0 25 0 0 0\n";
        let usage = parse_proc_stat(data).unwrap();
        // total = 1000, idle = 700
        assert!((usage - 30.0).abs() < 1e-9);
    }

    #[test]
    fn proc_stat_rejects_malformed_input() {
        assert!(parse_proc_stat("").is_none());
        assert!(parse_proc_stat("intr 12345").is_none());
        assert!(parse_proc_stat("cpu 1 2").is_none());
    }

    #[test]
    fn meminfo_computes_used_fraction() {
        let data = "MemTotal:       8000 kB\nMemFree:        1000 kB\nMemAvailable:   2000 kB\n";
        let usage = parse_meminfo(data).unwrap();
        assert!((usage - 75.0).abs() < 1e-9);
    }

    #[test]
    fn meminfo_requires_total() {
        assert!(parse_meminfo("MemAvailable: 2000 kB\n").is_none());
    }

    #[test]
    fn disk_usage_is_a_percentage() {
        let usage = disk_usage();
        assert!((0.0..=100.0).contains(&usage));
    }

    #[test]
    fn hostname_is_nonempty_on_unix() {
        assert!(!hostname().is_empty());
    }
}
