use crate::{Error, Result};

/// Handle to a target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Process {
    pid: i32,
}

impl Process {
    /// # Safety
    /// The caller must ensure the PID is valid and refers to a live process.
    ///
    /// # Examples
    /// ```no_run
    /// # use jvm_attach::Process;
    /// let process = unsafe { Process::from_pid_unchecked(1234) };
    /// ```
    pub unsafe fn from_pid_unchecked(pid: i32) -> Process {
        Process { pid }
    }

    /// Create a process handle after verifying the PID exists.
    ///
    /// A permission failure during the probe is surfaced as an error
    /// instead of being read as "exists".
    ///
    /// # Examples
    /// ```no_run
    /// # use jvm_attach::Process;
    /// let process = Process::from_pid(1234)?;
    /// # Ok::<(), jvm_attach::Error>(())
    /// ```
    pub fn from_pid(pid: i32) -> Result<Process> {
        if pid <= 0 {
            return Err(Error::invalid_input("pid must be > 0"));
        }

        if process_exists(pid)? {
            Ok(Process { pid })
        } else {
            Err(Error::process_not_found(pid))
        }
    }

    /// Return the PID.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Read the facts the attach handshake needs from `/proc/<pid>/status`.
    #[cfg(target_os = "linux")]
    pub(crate) fn status(&self) -> Result<ProcStatus> {
        let path = format!("/proc/{}/status", self.pid);
        let text = std::fs::read_to_string(&path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => Error::process_not_found(self.pid),
            _ => Error::io_context(format_args!("reading {path}"), err),
        })?;
        ProcStatus::parse(self.pid, &text)
    }

    /// Read `/proc/<pid>/cmdline` as a list of arguments.
    #[cfg(target_os = "linux")]
    pub(crate) fn cmdline(&self) -> Result<Vec<String>> {
        let raw = std::fs::read(format!("/proc/{}/cmdline", self.pid))?;
        Ok(raw
            .split(|b| *b == 0)
            .filter(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect())
    }
}

impl TryFrom<i32> for Process {
    type Error = Error;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        Process::from_pid(value)
    }
}

/// Subset of `/proc/<pid>/status` used while attaching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProcStatus {
    /// Pid of the process inside its innermost pid namespace.
    pub(crate) ns_pid: i32,
    /// Effective uid.
    pub(crate) uid: u32,
    /// Effective gid.
    pub(crate) gid: u32,
    /// Whether the process installed a handler for `SIGQUIT`.
    pub(crate) catches_quit: bool,
}

impl ProcStatus {
    pub(crate) fn parse(pid: i32, text: &str) -> Result<ProcStatus> {
        let mut ns_pid = None;
        let mut uid = None;
        let mut gid = None;
        let mut caught = None;

        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let mut fields = value.split_whitespace();
            match key {
                // Real, effective, saved, fs; we want the effective id.
                "Uid" => uid = fields.nth(1).and_then(|v| v.parse().ok()),
                "Gid" => gid = fields.nth(1).and_then(|v| v.parse().ok()),
                // Outermost first; the last entry is the pid the JVM sees.
                "NSpid" => ns_pid = fields.last().and_then(|v| v.parse().ok()),
                "SigCgt" => caught = fields.next().and_then(|v| u64::from_str_radix(v, 16).ok()),
                _ => {}
            }
        }

        match (uid, gid) {
            (Some(uid), Some(gid)) => Ok(ProcStatus {
                ns_pid: ns_pid.unwrap_or(pid),
                uid,
                gid,
                // Without a mask we cannot tell; let the handshake decide.
                catches_quit: caught.is_none_or(|mask| mask & QUIT_MASK != 0),
            }),
            _ => Err(Error::io(format_args!(
                "unable to read credentials of process {pid}"
            ))),
        }
    }
}

// Bit for signal 3 in the SigCgt mask, where signal n is bit n - 1.
const QUIT_MASK: u64 = 1 << 2;

#[cfg(unix)]
fn process_exists(pid: i32) -> Result<bool> {
    use libc::kill;

    // POSIX: signal 0 performs permission/existence checks without delivering a signal.
    let res = unsafe { kill(pid, 0) };
    if res == 0 {
        return Ok(true);
    }

    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(false),
        Some(libc::EPERM) => Err(Error::permission_denied(format_args!(
            "probing process {pid} (kill(pid, 0))"
        ))),
        _ => Err(Error::from(err)),
    }
}

#[cfg(not(unix))]
fn process_exists(_pid: i32) -> Result<bool> {
    Err(Error::not_supported(
        "process probing is only implemented on unix",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "\
Name:\tjava
Umask:\t0022
State:\tS (sleeping)
Tgid:\t4242
Pid:\t4242
Uid:\t1000\t1001\t1001\t1001
Gid:\t100\t101\t101\t101
NSpid:\t4242\t17
SigCgt:\t2000000181005ccf
";

    #[test]
    fn parses_effective_ids_and_innermost_ns_pid() {
        let status = ProcStatus::parse(4242, STATUS).unwrap();
        assert_eq!(status.uid, 1001);
        assert_eq!(status.gid, 101);
        assert_eq!(status.ns_pid, 17);
        assert!(status.catches_quit);
    }

    #[test]
    fn default_quit_disposition_is_detected() {
        let text = "Uid:\t0\t0\t0\t0\nGid:\t0\t0\t0\t0\nSigIgn:\t0000000000000004\nSigCgt:\t0000000000000000\n";
        let status = ProcStatus::parse(99, text).unwrap();
        assert!(!status.catches_quit);
    }

    #[test]
    fn ns_pid_defaults_to_pid_on_old_kernels() {
        let text = "Uid:\t0\t0\t0\t0\nGid:\t0\t0\t0\t0\n";
        let status = ProcStatus::parse(99, text).unwrap();
        assert_eq!(status.ns_pid, 99);
    }

    #[test]
    fn missing_credentials_is_an_io_error() {
        let err = ProcStatus::parse(99, "Name:\tjava\n").unwrap_err();
        assert!(err.is_io());
    }
}
