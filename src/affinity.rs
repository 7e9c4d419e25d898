//! Processor-affinity capability.
//!
//! The consumer thread can move itself to the last ("junk") CPU so it never
//! competes with latency-critical producer threads for a core.

use crate::error::{LoggerError, Result};

/// Pins or unpins the calling thread.
pub trait Affinity: Send + Sync {
    /// `pin == true` moves the calling thread to the last online CPU;
    /// `pin == false` restores the default of all online CPUs.
    fn set_junk_thread_affinity(&self, pin: bool) -> Result<()>;
}

/// Affinity through the operating system scheduler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAffinity;

impl Affinity for SystemAffinity {
    #[cfg(target_os = "linux")]
    fn set_junk_thread_affinity(&self, pin: bool) -> Result<()> {
        use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_ZERO};
        use std::mem;

        let cpus = online_cpus();
        let junk = cpus.saturating_sub(1);

        // SAFETY: the set is zero-initialised with CPU_ZERO before use and
        // pid 0 names the calling thread.
        unsafe {
            let mut set: cpu_set_t = mem::zeroed();
            CPU_ZERO(&mut set);
            if pin {
                CPU_SET(junk, &mut set);
            } else {
                for cpu in 0..cpus {
                    CPU_SET(cpu, &mut set);
                }
            }
            if sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &set) != 0 {
                return Err(LoggerError::Affinity {
                    cpu: junk,
                    message: std::io::Error::last_os_error().to_string(),
                });
            }
        }
        if pin {
            tracing::info!(cpu = junk, "moved thread to junk cpu");
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn set_junk_thread_affinity(&self, _pin: bool) -> Result<()> {
        Err(LoggerError::Unsupported("thread cpu affinity"))
    }
}

/// Number of online CPUs, at least 1.
#[cfg(target_os = "linux")]
fn online_cpus() -> usize {
    // SAFETY: sysconf has no preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 {
        1
    } else {
        n as usize
    }
}

/// Leaves affinity alone. Useful where pinning is not wanted or not allowed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAffinity;

impl Affinity for NoAffinity {
    fn set_junk_thread_affinity(&self, _pin: bool) -> Result<()> {
        Ok(())
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_pin_and_restore_on_a_scratch_thread() {
        std::thread::spawn(|| {
            // Containers may forbid some CPUs; only a successful pin is checked.
            if SystemAffinity.set_junk_thread_affinity(true).is_ok() {
                SystemAffinity.set_junk_thread_affinity(false).ok();
            }
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_online_cpus_positive() {
        assert!(online_cpus() >= 1);
    }
}
