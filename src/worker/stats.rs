use sysinfo::{Disks, System};

use super::types::SystemStats;

/// Snapshot the machine. Memory and disk figures are reported in MB.
pub fn get_stats(sys: &System, task_count: u64) -> SystemStats {
    let disks = Disks::new_with_refreshed_list();
    let disk_total: u64 = disks.iter().map(|disk| disk.total_space()).sum();
    let disk_available: u64 = disks.iter().map(|disk| disk.available_space()).sum();
    let disk_usage = if disk_total > 0 {
        ((disk_total - disk_available) as f32 / disk_total as f32) * 100.0
    } else {
        0.0
    };

    SystemStats {
        cpu_usage: (sys.global_cpu_usage() * 100.0).round() / 100.0,
        total_memory: sys.total_memory() / 1024 / 1024,
        used_memory: sys.used_memory() / 1024 / 1024,
        total_swap: sys.total_swap() / 1024 / 1024,
        used_swap: sys.used_swap() / 1024 / 1024,
        system_name: System::name().unwrap_or_else(|| "unknown".to_string()),
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        total_cpus: sys.cpus().len() as u64,
        disk_total: disk_total / 1024 / 1024,
        disk_usage,
        task_count,
    }
}
