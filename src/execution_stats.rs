//! Resource use of a batch of trajectories.
// Loss of precision is allowable in this module's use cases.
#![allow(clippy::cast_precision_loss)]

use std::time::{Duration, Instant};

use bytesize::ByteSize;
use humantime::format_duration;
use log::{debug, error, info};
use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// How frequently the peak memory is polled.
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Summary statistics of a batch. Per-trajectory and per-person-day figures
/// are zero when nothing was simulated.
#[derive(Serialize, Debug, Clone)]
pub struct ExecutionStatistics {
    pub max_memory_usage: u64,
    pub cpu_time: Duration,
    pub wall_time: Duration,

    pub trajectories: usize,
    /// Individuals times simulated days, summed over trajectories.
    pub person_days: u64,
    pub wall_time_per_trajectory: Duration,
    pub cpu_time_per_million_person_days: Duration,
}

pub(crate) struct ExecutionProfilingCollector {
    start_time: Instant,
    last_refresh: Instant,
    /// CPU-milliseconds used by the process before the batch started.
    start_cpu_time: u64,
    /// Peak resident memory seen so far.
    max_memory_usage: u64,
    system: System,
    /// `None` on platforms `sysinfo` does not support.
    process_id: Option<Pid>,
}

impl ExecutionProfilingCollector {
    pub fn new() -> ExecutionProfilingCollector {
        let process_id = sysinfo::get_current_pid().ok();
        let now = Instant::now();
        let mut collector = ExecutionProfilingCollector {
            start_time: now,
            last_refresh: now,
            start_cpu_time: 0,
            max_memory_usage: 0,
            system: System::new(),
            process_id,
        };
        if let Some(pid) = process_id {
            debug!("Process ID: {}", pid);
            collector.update_system_info(ProcessRefreshKind::nothing().with_cpu().with_memory());
            if let Some(process) = collector.system.process(pid) {
                collector.max_memory_usage = process.memory();
                collector.start_cpu_time = process.accumulated_cpu_time();
            }
        }
        collector
    }

    /// Polls memory use if at least `REFRESH_INTERVAL` has passed since the
    /// last poll. Cheap enough to call after every batch.
    pub fn refresh(&mut self) {
        if self.last_refresh.elapsed() >= REFRESH_INTERVAL {
            self.poll_memory();
            self.last_refresh = Instant::now();
        }
    }

    fn poll_memory(&mut self) {
        if let Some(pid) = self.process_id {
            self.update_system_info(ProcessRefreshKind::nothing().with_memory());
            if let Some(process) = self.system.process(pid) {
                self.max_memory_usage = self.max_memory_usage.max(process.memory());
            }
        }
    }

    fn update_system_info(&mut self, process_refresh_kind: ProcessRefreshKind) {
        if let Some(pid) = self.process_id {
            if self.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                process_refresh_kind,
            ) < 1
            {
                error!("could not refresh process statistics");
            }
        }
    }

    pub fn compute_final_statistics(
        &mut self,
        trajectories: usize,
        person_days: u64,
    ) -> ExecutionStatistics {
        let mut cpu_time_millis = 0;
        if let Some(pid) = self.process_id {
            self.update_system_info(ProcessRefreshKind::nothing().with_cpu().with_memory());
            if let Some(process) = self.system.process(pid) {
                self.max_memory_usage = self.max_memory_usage.max(process.memory());
                cpu_time_millis = process
                    .accumulated_cpu_time()
                    .saturating_sub(self.start_cpu_time);
            }
        }
        let cpu_time = Duration::from_millis(cpu_time_millis);
        let wall_time = self.start_time.elapsed();

        let wall_time_per_trajectory = if trajectories > 0 {
            wall_time / u32::try_from(trajectories).unwrap_or(u32::MAX)
        } else {
            Duration::ZERO
        };
        let cpu_time_per_million_person_days = if person_days > 0 {
            Duration::from_secs_f64(cpu_time.as_secs_f64() * 1e6 / person_days as f64)
        } else {
            Duration::ZERO
        };

        ExecutionStatistics {
            max_memory_usage: self.max_memory_usage,
            cpu_time,
            wall_time,
            trajectories,
            person_days,
            wall_time_per_trajectory,
            cpu_time_per_million_person_days,
        }
    }
}

/// Logs execution statistics.
pub fn log_execution_statistics(stats: &ExecutionStatistics) {
    info!("Batch complete.");
    if stats.max_memory_usage == 0 {
        info!("Memory and CPU statistics are not available on your platform.");
    } else {
        info!("Max memory usage: {}", ByteSize::b(stats.max_memory_usage));
        info!("CPU time: {}", format_duration(stats.cpu_time));
    }
    info!("Wall time: {}", format_duration(stats.wall_time));

    if stats.trajectories > 0 {
        info!("Trajectories: {}", stats.trajectories);
        info!(
            "Wall time per trajectory: {}",
            format_duration(stats.wall_time_per_trajectory)
        );
    }
    if stats.person_days > 0 && stats.max_memory_usage > 0 {
        info!(
            "CPU time per million person-days: {}",
            format_duration(stats.cpu_time_per_million_person_days)
        );
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn collector_reports_memory() {
        let collector = ExecutionProfilingCollector::new();
        assert!(collector.max_memory_usage > 0);
    }

    #[test]
    fn refresh_respects_interval() {
        let mut collector = ExecutionProfilingCollector::new();
        let before = collector.max_memory_usage;
        collector.refresh();
        assert_eq!(collector.max_memory_usage, before);
    }

    #[test]
    fn final_statistics() {
        let mut collector = ExecutionProfilingCollector::new();
        thread::sleep(Duration::from_millis(50));
        let stats = collector.compute_final_statistics(4, 1_000);
        assert!(stats.wall_time >= Duration::from_millis(50));
        assert_eq!(stats.trajectories, 4);
        assert!(stats.wall_time_per_trajectory >= Duration::from_millis(12));
    }

    #[test]
    fn nothing_simulated() {
        let mut collector = ExecutionProfilingCollector::new();
        let stats = collector.compute_final_statistics(0, 0);
        assert_eq!(stats.wall_time_per_trajectory, Duration::ZERO);
        assert_eq!(stats.cpu_time_per_million_person_days, Duration::ZERO);
    }
}
