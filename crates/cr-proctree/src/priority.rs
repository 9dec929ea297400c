//! Scheduling-priority helpers applied around child spawn.

use cr_core::Priority;

/// Clamp a raw niceness to the valid POSIX range.
pub fn clamp_nice(nice: i32) -> i32 {
    nice.clamp(-20, 19)
}

/// POSIX niceness for a priority level.
pub fn nice_level(priority: Priority) -> i32 {
    match priority {
        Priority::Low => 10,
        Priority::Normal => 0,
        Priority::High => -10,
        Priority::Nice(nice) => clamp_nice(nice),
    }
}

/// Apply a niceness to the calling process. Runs in the child between
/// fork and exec.
#[cfg(unix)]
pub fn apply_niceness(nice: i32) -> std::io::Result<()> {
    // SAFETY: setpriority targets the calling process (who = 0) and is
    // safe to call between fork and exec.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Apply an I/O scheduling class to the calling process.
///
/// Linux-only; other POSIX platforms have no portable equivalent and the
/// request is accepted as a no-op.
#[cfg(unix)]
pub fn apply_io_priority(priority: Priority) -> std::io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        const IOPRIO_WHO_PROCESS: libc::c_int = 1;
        const IOPRIO_CLASS_SHIFT: i32 = 13;
        const IOPRIO_CLASS_BE: i32 = 2;
        const IOPRIO_CLASS_IDLE: i32 = 3;

        let (class, data) = match priority {
            Priority::Low => (IOPRIO_CLASS_IDLE, 0),
            Priority::Normal => (IOPRIO_CLASS_BE, 4),
            Priority::High => (IOPRIO_CLASS_BE, 0),
            Priority::Nice(nice) => (IOPRIO_CLASS_BE, nice.clamp(0, 7)),
        };
        let ioprio = (class << IOPRIO_CLASS_SHIFT) | data;
        // SAFETY: raw syscall with scalar arguments, no pointers involved.
        let rc = unsafe { libc::syscall(libc::SYS_ioprio_set, IOPRIO_WHO_PROCESS, 0, ioprio) };
        if rc == -1 {
            return Err(std::io::Error::last_os_error());
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = priority;
    Ok(())
}

/// Windows priority-class creation flag for the given level.
#[cfg(windows)]
pub fn priority_class_flag(priority: Priority) -> u32 {
    const NORMAL_PRIORITY_CLASS: u32 = 0x0000_0020;
    const BELOW_NORMAL_PRIORITY_CLASS: u32 = 0x0000_4000;
    const HIGH_PRIORITY_CLASS: u32 = 0x0000_0080;

    match priority {
        Priority::Low => BELOW_NORMAL_PRIORITY_CLASS,
        Priority::Normal => NORMAL_PRIORITY_CLASS,
        Priority::High => HIGH_PRIORITY_CLASS,
        Priority::Nice(nice) => {
            if nice > 0 {
                BELOW_NORMAL_PRIORITY_CLASS
            } else if nice < 0 {
                HIGH_PRIORITY_CLASS
            } else {
                NORMAL_PRIORITY_CLASS
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_nice_bounds() {
        assert_eq!(clamp_nice(-100), -20);
        assert_eq!(clamp_nice(100), 19);
        assert_eq!(clamp_nice(5), 5);
    }

    #[test]
    fn test_nice_level_mapping() {
        assert_eq!(nice_level(Priority::Low), 10);
        assert_eq!(nice_level(Priority::Normal), 0);
        assert_eq!(nice_level(Priority::High), -10);
        assert_eq!(nice_level(Priority::Nice(42)), 19);
        assert_eq!(nice_level(Priority::Nice(-42)), -20);
    }
}
