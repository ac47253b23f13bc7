//! Thin wrappers over the Linux process interfaces the runtime needs
//!
//! Signals go through libc; process identity comes from procfs.

use std::fs;
use std::io;

/// Result type for syscall operations
pub type SyscallResult<T> = std::result::Result<T, io::Error>;

/// Send a signal to a process (or to a process group when `pid` is negative)
pub fn kill(pid: i32, signal: i32) -> SyscallResult<()> {
    let result = unsafe { libc::kill(pid, signal) };
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// True if `err` is "no such process"
pub fn is_esrch(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}

/// The parts of `/proc/<pid>/stat` used to identify a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcStat {
    /// Scheduler state (`R`, `S`, `Z`, ...)
    pub state: char,
    /// Start time in clock ticks since boot
    pub start_time: u64,
}

impl ProcStat {
    /// Read the stat line of `pid`; `None` if the process does not exist
    pub fn read(pid: u32) -> SyscallResult<Option<Self>> {
        match fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(line) => Self::parse(&line).map(Some).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unparseable /proc/{}/stat", pid),
                )
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            // ESRCH surfaces when the process vanishes between open and read
            Err(e) if is_esrch(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Parse a stat line. The command name (field 2) is parenthesised and may
    /// itself contain spaces and parentheses, so fields are counted from the
    /// last `)`.
    pub fn parse(line: &str) -> Option<Self> {
        let close = line.rfind(')')?;
        let mut fields = line[close + 1..].split_whitespace();

        // Field 3 is the state; starttime is field 22
        let state = fields.next()?.chars().next()?;
        let start_time = fields.nth(18)?.parse().ok()?;

        Some(Self { state, start_time })
    }

    /// Zombie or dead: the process has exited but was not reaped yet
    pub fn is_defunct(&self) -> bool {
        matches!(self.state, 'Z' | 'X' | 'x')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_line() {
        let line = "1234 (python3) S 1 1234 1234 0 -1 4194560 1510 0 0 0 3 1 0 0 20 0 1 0 987654 25890816 2391 18446744073709551615 1 1 0 0 0 0 0 16781312 2 0 0 0 17 3 0 0 0 0 0";
        let stat = ProcStat::parse(line).unwrap();
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.start_time, 987654);
        assert!(!stat.is_defunct());
    }

    #[test]
    fn test_parse_stat_with_odd_command_name() {
        let line = "42 (my (weird) cmd) Z 1 42 42 0 -1 0 0 0 0 0 0 0 0 0 20 0 1 0 555 0 0";
        let stat = ProcStat::parse(line).unwrap();
        assert_eq!(stat.state, 'Z');
        assert_eq!(stat.start_time, 555);
        assert!(stat.is_defunct());
    }

    #[test]
    fn test_parse_truncated_line() {
        assert!(ProcStat::parse("1 (sh) S 1 2").is_none());
        assert!(ProcStat::parse("garbage").is_none());
    }

    #[test]
    fn test_read_own_stat() {
        let stat = ProcStat::read(std::process::id()).unwrap().unwrap();
        assert!(stat.start_time > 0);
    }

    #[test]
    fn test_kill_zero_on_self() {
        assert!(kill(std::process::id() as i32, 0).is_ok());
    }
}
