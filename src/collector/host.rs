// Host counters from /proc, disk totals via sysinfo. Each sub-sample is
// independent; a failed read leaves that field at zero.

use crate::models::HostMetric;
use chrono::Utc;
use std::path::Path;

pub struct HostSampler {
    prev_cpu: Option<CpuSample>,
}

#[derive(Debug, Clone, Copy)]
struct CpuSample {
    total: u64,
    idle: u64,
}

impl HostSampler {
    pub fn new() -> Self {
        Self { prev_cpu: None }
    }

    /// One host sample stamped `now UTC`. CPU% is a delta against the
    /// previous call, so the first call reports 0.
    pub fn collect(&mut self) -> HostMetric {
        let mut metric = HostMetric {
            ts: Utc::now(),
            ..Default::default()
        };

        if let Some(sample) = read_file("/proc/stat").as_deref().and_then(parse_proc_stat) {
            if let Some(prev) = self.prev_cpu {
                let delta_total = sample.total.saturating_sub(prev.total);
                let delta_idle = sample.idle.saturating_sub(prev.idle);
                if delta_total > 0 {
                    metric.cpu_pct = 100.0 * (1.0 - delta_idle as f64 / delta_total as f64);
                }
            }
            self.prev_cpu = Some(sample);
        }

        if let Some((total, available)) = read_file("/proc/meminfo").as_deref().and_then(parse_meminfo)
        {
            metric.mem_total_bytes = total as i64;
            metric.mem_used_bytes = total.saturating_sub(available) as i64;
        }

        if let Some(content) = read_file("/proc/net/dev") {
            let (rx, tx) = parse_net_dev(&content);
            metric.net_rx_bytes = rx as i64;
            metric.net_tx_bytes = tx as i64;
        }

        if let Some((total, used)) = read_root_disk_usage() {
            metric.disk_total_bytes = total as i64;
            metric.disk_used_bytes = used as i64;
        }

        if let Some((l1, l5, l15)) = read_file("/proc/loadavg").as_deref().and_then(parse_loadavg)
        {
            metric.load1 = l1;
            metric.load5 = l5;
            metric.load15 = l15;
        }

        if let Some(up) = read_file("/proc/uptime").as_deref().and_then(parse_uptime) {
            metric.uptime_sec = up;
        }

        metric
    }
}

fn read_file(path: &str) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

/// Total and idle jiffies from the aggregate `cpu ` line. Idle includes
/// iowait when the kernel reports it.
fn parse_proc_stat(content: &str) -> Option<CpuSample> {
    let line = content.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map_while(|f| f.parse().ok())
        .collect();
    if values.len() < 5 {
        return None;
    }
    let total = values.iter().sum();
    let idle = values[3] + values[4];
    Some(CpuSample { total, idle })
}

/// (MemTotal, MemAvailable) in bytes, scaled from the kernel's KiB.
fn parse_meminfo(content: &str) -> Option<(u64, u64)> {
    let mut total = 0u64;
    let mut available = 0u64;
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("MemTotal:") => total = fields.next()?.parse::<u64>().ok()? * 1024,
            Some("MemAvailable:") => available = fields.next()?.parse::<u64>().ok()? * 1024,
            _ => {}
        }
    }
    (total > 0).then_some((total, available))
}

/// Receive/transmit byte totals summed over every interface except loopback.
fn parse_net_dev(content: &str) -> (u64, u64) {
    let mut rx = 0u64;
    let mut tx = 0u64;
    for line in content.lines() {
        let Some((iface, rest)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 16 {
            continue;
        }
        rx += fields[0].parse::<u64>().unwrap_or(0);
        tx += fields[8].parse::<u64>().unwrap_or(0);
    }
    (rx, tx)
}

fn parse_loadavg(content: &str) -> Option<(f64, f64, f64)> {
    let mut fields = content.split_whitespace();
    let l1 = fields.next()?.parse().ok()?;
    let l5 = fields.next()?.parse().ok()?;
    let l15 = fields.next()?.parse().ok()?;
    Some((l1, l5, l15))
}

fn parse_uptime(content: &str) -> Option<i64> {
    let first = content.split_whitespace().next()?;
    first.parse::<f64>().ok().map(|f| f as i64)
}

/// (total, used) bytes of the root filesystem.
fn read_root_disk_usage() -> Option<(u64, u64)> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))?;
    let total = root.total_space();
    Some((total, total.saturating_sub(root.available_space())))
}
