//! OS counters sampled by the metrics task

use crate::error::VisionError;
use parking_lot::Mutex;
use sysinfo::{Pid, System};

/// Cumulative CPU time counters, in kernel ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTicks {
    pub user: u64,
    pub system: u64,
    pub idle: u64,
}

impl CpuTicks {
    pub fn total(&self) -> u64 {
        self.user + self.system + self.idle
    }

    /// Ticks accumulated since `earlier`
    pub fn since(&self, earlier: &CpuTicks) -> CpuTicks {
        CpuTicks {
            user: self.user.saturating_sub(earlier.user),
            system: self.system.saturating_sub(earlier.system),
            idle: self.idle.saturating_sub(earlier.idle),
        }
    }

    /// Busy share of these ticks, `None` when no time elapsed
    pub fn utilization(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            None
        } else {
            Some((self.user + self.system) as f64 / total as f64)
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait SystemProbe: Send + Sync {
    fn cpu_ticks(&self) -> Result<CpuTicks, VisionError>;

    /// Resident memory of this process in bytes
    fn resident_memory(&self) -> Result<u64, VisionError>;
}

/// Parse the aggregate `cpu` line of `/proc/stat`.
///
/// `nice` counts as user time; `irq` and `softirq` as system time;
/// `iowait` as idle time.
pub fn parse_proc_stat(content: &str) -> Result<CpuTicks, VisionError> {
    let line = content
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or_else(|| VisionError::Metrics("no aggregate cpu line".to_string()))?;

    let fields = line
        .split_whitespace()
        .skip(1)
        .map(|field| field.parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| VisionError::Metrics(format!("bad cpu counter: {}", e)))?;

    if fields.len() < 4 {
        return Err(VisionError::Metrics(format!(
            "expected at least 4 cpu counters, found {}",
            fields.len()
        )));
    }

    let field = |i: usize| fields.get(i).copied().unwrap_or(0);
    Ok(CpuTicks {
        user: field(0) + field(1),
        system: field(2) + field(5) + field(6),
        idle: field(3) + field(4),
    })
}

/// Probe for the host this process runs on
pub struct HostProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl SystemProbe for HostProbe {
    fn cpu_ticks(&self) -> Result<CpuTicks, VisionError> {
        let content = std::fs::read_to_string("/proc/stat")
            .map_err(|e| VisionError::Metrics(format!("cannot read /proc/stat: {}", e)))?;
        parse_proc_stat(&content)
    }

    fn resident_memory(&self) -> Result<u64, VisionError> {
        let pid = self
            .pid
            .ok_or_else(|| VisionError::Metrics("current pid unavailable".to_string()))?;

        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return Err(VisionError::Metrics(format!("process {} not found", pid)));
        }
        system
            .process(pid)
            .map(|process| process.memory())
            .ok_or_else(|| VisionError::Metrics(format!("process {} not found", pid)))
    }
}
