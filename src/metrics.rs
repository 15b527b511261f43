use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Host-level execution counters, logged by the heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostMetrics {
    pub uptime_sec: u64,
    pub executions_total: u64,
    pub executions_success: u64,
    pub executions_failed: u64,
    pub memory_bytes: u64,
    pub per_service: HashMap<String, u64>,
}

impl HostMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful execution against a service
    pub fn record_success(&mut self, service: &str) {
        self.executions_total += 1;
        self.executions_success += 1;
        *self.per_service.entry(service.to_string()).or_insert(0) += 1;
    }

    /// Record a failed execution against a service
    pub fn record_failure(&mut self, service: &str) {
        self.executions_total += 1;
        self.executions_failed += 1;
        *self.per_service.entry(service.to_string()).or_insert(0) += 1;
    }

    /// Get success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.executions_total == 0 {
            return 100.0;
        }
        (self.executions_success as f64 / self.executions_total as f64) * 100.0
    }

    /// Increment uptime (typically called every heartbeat interval)
    pub fn increment_uptime(&mut self, seconds: u64) {
        self.uptime_sec += seconds;
    }

    /// Update memory usage from system
    pub fn update_memory(&mut self) {
        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
                for line in status.lines() {
                    if line.starts_with("VmRSS:") {
                        if let Some(kb) = line.split_whitespace().nth(1) {
                            if let Ok(kb) = kb.parse::<u64>() {
                                self.memory_bytes = kb * 1024;
                            }
                        }
                    }
                }
            }
        }
    }
}
