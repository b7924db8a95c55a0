// Reduce a raw stats snapshot to the container metric row we persist.

use super::StatsSnapshot;
use crate::models::ContainerMetric;

/// CPU% follows the Engine's own formula: usage delta over system delta,
/// scaled by the cpu count. Non-positive system delta or a negative usage
/// delta yields 0. The caller stamps `ts`.
pub fn normalize_stats(id: &str, s: &StatsSnapshot) -> ContainerMetric {
    let sys_delta = s.cpu_stats.system_cpu_usage as f64 - s.precpu_stats.system_cpu_usage as f64;
    let cpu_delta =
        s.cpu_stats.cpu_usage.total_usage as f64 - s.precpu_stats.cpu_usage.total_usage as f64;
    let mut cpus = s.cpu_stats.online_cpus as f64;
    if cpus == 0.0 {
        cpus = s.cpu_stats.cpu_usage.percpu_usage.len() as f64;
        if cpus == 0.0 {
            cpus = 1.0;
        }
    }
    let cpu_pct = if sys_delta > 0.0 && cpu_delta >= 0.0 {
        (cpu_delta / sys_delta) * cpus * 100.0
    } else {
        0.0
    };

    let mut rx = 0u64;
    let mut tx = 0u64;
    for n in s.networks.values() {
        rx += n.rx_bytes;
        tx += n.tx_bytes;
    }

    let mut blk_read = 0u64;
    let mut blk_write = 0u64;
    if let Some(entries) = &s.blkio_stats.io_service_bytes_recursive {
        for e in entries {
            match e.op.as_str() {
                "Read" => blk_read += e.value,
                "Write" => blk_write += e.value,
                _ => {}
            }
        }
    }

    ContainerMetric {
        container_id: id.to_string(),
        cpu_pct,
        mem_used_bytes: s.memory_stats.usage as i64,
        mem_limit_bytes: s.memory_stats.limit as i64,
        net_rx_bytes: rx as i64,
        net_tx_bytes: tx as i64,
        blk_read_bytes: blk_read as i64,
        blk_write_bytes: blk_write as i64,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::{BlkioEntry, NetworkCounters};

    fn snapshot(total: u64, pre_total: u64, system: u64, pre_system: u64) -> StatsSnapshot {
        let mut s = StatsSnapshot::default();
        s.cpu_stats.cpu_usage.total_usage = total;
        s.cpu_stats.system_cpu_usage = system;
        s.cpu_stats.online_cpus = 2;
        s.precpu_stats.cpu_usage.total_usage = pre_total;
        s.precpu_stats.system_cpu_usage = pre_system;
        s
    }

    #[test]
    fn cpu_percent_scales_by_online_cpus() {
        let s = snapshot(100_000_000, 50_000_000, 1_000_000_000, 500_000_000);
        let m = normalize_stats("abc", &s);
        assert!((m.cpu_pct - 20.0).abs() < 0.01);
    }

    #[test]
    fn cpu_percent_zero_when_system_delta_not_positive() {
        let s = snapshot(100, 50, 500, 500);
        assert_eq!(normalize_stats("abc", &s).cpu_pct, 0.0);
        let s = snapshot(100, 50, 400, 500);
        assert_eq!(normalize_stats("abc", &s).cpu_pct, 0.0);
    }

    #[test]
    fn cpu_percent_zero_when_usage_delta_negative() {
        let s = snapshot(40, 50, 1000, 500);
        assert_eq!(normalize_stats("abc", &s).cpu_pct, 0.0);
    }

    #[test]
    fn cpu_count_falls_back_to_percpu_then_one() {
        let mut s = snapshot(100, 0, 1000, 0);
        s.cpu_stats.online_cpus = 0;
        s.cpu_stats.cpu_usage.percpu_usage = vec![1, 2, 3, 4];
        let m = normalize_stats("abc", &s);
        assert!((m.cpu_pct - 40.0).abs() < 0.01);

        s.cpu_stats.cpu_usage.percpu_usage.clear();
        let m = normalize_stats("abc", &s);
        assert!((m.cpu_pct - 10.0).abs() < 0.01);
    }

    #[test]
    fn sums_network_and_block_io() {
        let mut s = snapshot(0, 0, 0, 0);
        s.networks.insert(
            "eth0".into(),
            NetworkCounters {
                rx_bytes: 1000,
                tx_bytes: 2000,
            },
        );
        s.networks.insert(
            "eth1".into(),
            NetworkCounters {
                rx_bytes: 10,
                tx_bytes: 20,
            },
        );
        s.blkio_stats.io_service_bytes_recursive = Some(vec![
            BlkioEntry {
                op: "Read".into(),
                value: 100,
            },
            BlkioEntry {
                op: "Write".into(),
                value: 200,
            },
            BlkioEntry {
                op: "Sync".into(),
                value: 999,
            },
        ]);
        s.memory_stats.usage = 256;
        s.memory_stats.limit = 512;
        let m = normalize_stats("abc", &s);
        assert_eq!(m.container_id, "abc");
        assert_eq!(m.net_rx_bytes, 1010);
        assert_eq!(m.net_tx_bytes, 2020);
        assert_eq!(m.blk_read_bytes, 100);
        assert_eq!(m.blk_write_bytes, 200);
        assert_eq!(m.mem_used_bytes, 256);
        assert_eq!(m.mem_limit_bytes, 512);
    }
}
