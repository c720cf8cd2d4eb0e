//! Proc sampler
//! Resource usage for worker pids, read from procfs

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;

use crate::domain::error::{DomainError, Result};
use crate::domain::ports::ResourceSampler;
use crate::domain::value_objects::HealthSample;

struct CpuObservation {
    at: Instant,
    busy_ticks: u64,
}

/// Samples workers through `/proc/<pid>/`.
///
/// Event-loop utilization is approximated as the fraction of wall time the
/// process spent on CPU between two samples; the first sample of a pid
/// reports zero. Heap figures come from `statm` (resident and virtual
/// size), the heap limit from the machine's total memory. Generational
/// breakdown is not visible from outside the process, so
/// `young_generation` stays zero.
pub struct ProcSampler {
    previous: Mutex<HashMap<u32, CpuObservation>>,
    page_size: u64,
    ticks_per_second: u64,
    total_memory: u64,
}

impl ProcSampler {
    pub fn new() -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) }.max(4096) as u64;
        let ticks_per_second =
            unsafe { libc::sysconf(libc::_SC_CLK_TCK) }.max(100) as u64;
        Self {
            previous: Mutex::new(HashMap::new()),
            page_size,
            ticks_per_second,
            total_memory: read_total_memory().unwrap_or(0),
        }
    }

    fn read_busy_ticks(pid: u32) -> Result<u64> {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .map_err(|err| DomainError::Io(format!("pid {pid}: {err}")))?;
        // Skip past the parenthesised comm, which may contain spaces.
        let rest = stat
            .rsplit_once(')')
            .map(|(_, rest)| rest)
            .ok_or_else(|| DomainError::Io(format!("pid {pid}: malformed stat")))?;
        let fields: Vec<&str> = rest.split_whitespace().collect();
        // After comm: state is field 0, utime 11, stime 12.
        let utime: u64 = fields
            .get(11)
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| DomainError::Io(format!("pid {pid}: malformed stat")))?;
        let stime: u64 = fields
            .get(12)
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| DomainError::Io(format!("pid {pid}: malformed stat")))?;
        Ok(utime + stime)
    }

    fn read_memory(&self, pid: u32) -> Result<(u64, u64)> {
        let statm = std::fs::read_to_string(format!("/proc/{pid}/statm"))
            .map_err(|err| DomainError::Io(format!("pid {pid}: {err}")))?;
        let mut fields = statm.split_whitespace();
        let vsize_pages: u64 = fields
            .next()
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| DomainError::Io(format!("pid {pid}: malformed statm")))?;
        let resident_pages: u64 = fields
            .next()
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| DomainError::Io(format!("pid {pid}: malformed statm")))?;
        Ok((
            resident_pages * self.page_size,
            vsize_pages * self.page_size,
        ))
    }

}

impl Default for ProcSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceSampler for ProcSampler {
    async fn sample(&self, pid: u32) -> Result<HealthSample> {
        let busy_ticks = Self::read_busy_ticks(pid)?;
        let (heap_used, heap_total) = self.read_memory(pid)?;
        let now = Instant::now();

        let elu = {
            let mut previous = self.previous.lock().expect("sampler lock poisoned");
            let elu = match previous.get(&pid) {
                Some(last) => {
                    let wall = now.duration_since(last.at).as_secs_f64();
                    if wall <= 0.0 {
                        0.0
                    } else {
                        let busy = busy_ticks.saturating_sub(last.busy_ticks) as f64
                            / self.ticks_per_second as f64;
                        (busy / wall).clamp(0.0, 1.0)
                    }
                }
                None => 0.0,
            };
            previous.insert(pid, CpuObservation { at: now, busy_ticks });
            elu
        };

        Ok(HealthSample {
            elu,
            heap_used,
            heap_total,
            heap_limit: self.total_memory,
            young_generation: 0,
        })
    }
}

fn read_total_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_own_pid() {
        let sampler = ProcSampler::new();
        let pid = std::process::id();

        let first = sampler.sample(pid).await.unwrap();
        assert_eq!(first.elu, 0.0);
        assert!(first.heap_used > 0);
        assert!(first.heap_total >= first.heap_used);

        let second = sampler.sample(pid).await.unwrap();
        assert!((0.0..=1.0).contains(&second.elu));
    }

    #[tokio::test]
    async fn test_dead_pid_errors() {
        let sampler = ProcSampler::new();
        // Pid near the default pid_max, almost certainly unused.
        let err = sampler.sample(4_194_000).await.unwrap_err();
        assert!(matches!(err, DomainError::Io(_)));
    }

    #[test]
    fn test_total_memory_readable() {
        assert!(read_total_memory().unwrap_or(0) > 0);
    }
}
