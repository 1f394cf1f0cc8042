//! Process resource sampling
//!
//! Reads CPU, memory and thread state for the current process through
//! `sysinfo` plus `/proc` where available. Sampling never fails: a metric
//! the platform cannot provide comes back as a `0` sentinel, because
//! instrumentation must not become a source of crashes in the host
//! application.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sysinfo::{Pid, System};

/// Point-in-time reading of process resource state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSnapshot {
    /// When the reading was taken
    pub taken_at: DateTime<Utc>,

    /// CPU utilization in percent; `0.0` when unavailable
    pub cpu_percent: f32,

    /// Memory utilization in percent of total; `0.0` when unavailable
    pub mem_percent: f32,

    /// Resident memory of this process in bytes; `0` when unavailable
    pub process_memory_bytes: u64,

    /// Live threads in this process; `0` when unavailable
    pub thread_count: i64,
}

/// Samples process resource state on demand
///
/// Called twice around every traced invocation, so it refreshes only CPU,
/// memory and this process's table entry rather than the whole system.
#[derive(Debug)]
pub struct ResourceSampler {
    system: Mutex<System>,
    pid: Pid,
}

impl ResourceSampler {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .unwrap_or_else(|_| Pid::from_u32(std::process::id()));

        // Prime the CPU counters so the first real snapshot has a baseline.
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_process(pid);

        Self {
            system: Mutex::new(system),
            pid,
        }
    }

    /// Take a snapshot of current resource state. Never fails; unavailable
    /// readings are `0` sentinels.
    pub fn snapshot(&self) -> ResourceSnapshot {
        let taken_at = Utc::now();

        let (cpu_percent, mem_percent, process_memory_bytes) = {
            let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
            system.refresh_cpu();
            system.refresh_memory();
            system.refresh_process(self.pid);

            let cpu_percent = system.global_cpu_info().cpu_usage();

            let total = system.total_memory();
            let mem_percent = if total == 0 {
                0.0
            } else {
                (system.used_memory() as f32 / total as f32) * 100.0
            };

            let process_memory_bytes = system
                .process(self.pid)
                .map(|process| process.memory())
                .unwrap_or(0);

            (cpu_percent, mem_percent, process_memory_bytes)
        };

        ResourceSnapshot {
            taken_at,
            cpu_percent,
            mem_percent,
            process_memory_bytes,
            thread_count: current_thread_count(),
        }
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread count of the current process, `0` where the platform offers no
/// cheap way to read it
fn current_thread_count() -> i64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("Threads:") {
                    if let Ok(count) = rest.trim().parse::<i64>() {
                        return count;
                    }
                }
            }
        }
        0
    }

    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}
