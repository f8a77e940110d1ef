use std::fs::{self, OpenOptions};
use std::os::unix::fs::MetadataExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::descriptor::display_name_from_cmdline;
use crate::process::ProcStatus;
use crate::{Error, Process, Result, VirtualMachineDescriptor};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Where a target VM's attach listener lives, as seen from this process.
#[derive(Debug)]
pub(super) struct Target {
    process: Process,
    status: ProcStatus,
    tmp_dir: PathBuf,
    tmp_overridden: bool,
    socket: PathBuf,
}

impl Target {
    pub(super) fn locate(process: Process, tmp_override: Option<&Path>) -> Result<Target> {
        let status = process.status()?;
        let (tmp_dir, tmp_overridden) = match tmp_override {
            Some(dir) => (dir.to_path_buf(), true),
            // Reach into the target's mount namespace so containers work.
            None => (PathBuf::from(format!("/proc/{}/root/tmp", process.pid())), false),
        };
        let socket = tmp_dir.join(format!(".java_pid{}", status.ns_pid));

        debug!(
            pid = process.pid(),
            ns_pid = status.ns_pid,
            socket = %socket.display(),
            "located attach target"
        );

        Ok(Target {
            process,
            status,
            tmp_dir,
            tmp_overridden,
            socket,
        })
    }

    pub(super) fn pid(&self) -> i32 {
        self.process.pid()
    }

    /// Make sure the target's attach listener is up, starting it if needed.
    pub(super) fn ensure_listener(&self, timeout: Duration) -> Result<()> {
        if self.socket.exists() {
            return Ok(());
        }

        // The default action for SIGQUIT would kill a process that is not a VM.
        if !self.status.catches_quit {
            return Err(Error::not_supported(format_args!(
                "process {} does not handle SIGQUIT; not a HotSpot VM?",
                self.pid()
            )));
        }

        let _attach_file = {
            let _creds = Impersonation::assume(&self.status)?;
            AttachFile::create(&self.attach_file_candidates())?
        };

        send_quit(self.pid())?;

        let mut waited = Duration::ZERO;
        let mut resent = false;
        while waited < timeout {
            thread::sleep(POLL_INTERVAL);
            waited += POLL_INTERVAL;
            if self.socket.exists() {
                debug!(pid = self.pid(), ?waited, "attach listener started");
                return Ok(());
            }
            // The first signal can race VM startup; nudge once more.
            if !resent && waited > timeout / 2 {
                send_quit(self.pid())?;
                resent = true;
            }
        }

        Err(Error::not_supported(format_args!(
            "unable to open socket file {}: target process {} doesn't respond within {}ms or HotSpot VM not loaded",
            self.socket.display(),
            self.pid(),
            timeout.as_millis()
        )))
    }

    /// The socket must belong to us, or to the target's user when we are root.
    pub(super) fn check_socket_owner(&self) -> Result<()> {
        let meta = fs::metadata(&self.socket)
            .map_err(|err| Error::io_context(format_args!("{}", self.socket.display()), err))?;
        let euid = unsafe { libc::geteuid() };
        let owner = meta.uid();
        if owner == euid || (euid == 0 && owner == self.status.uid) {
            return Ok(());
        }
        Err(Error::permission_denied(format_args!(
            "socket {} is owned by uid {owner}, expected {euid}",
            self.socket.display()
        )))
    }

    pub(super) fn connect(&self) -> Result<UnixStream> {
        let _creds = Impersonation::assume(&self.status)?;
        UnixStream::connect(&self.socket).map_err(|err| {
            Error::io_context(format_args!("connecting to {}", self.socket.display()), err)
        })
    }

    fn attach_file_candidates(&self) -> Vec<PathBuf> {
        let name = format!(".attach_pid{}", self.status.ns_pid);
        let mut candidates = Vec::with_capacity(2);
        if !self.tmp_overridden {
            candidates.push(PathBuf::from(format!("/proc/{}/cwd", self.pid())).join(&name));
        }
        candidates.push(self.tmp_dir.join(&name));
        candidates
    }
}

/// Trigger file that tells the VM's signal handler to start the listener.
/// Removed when dropped.
struct AttachFile {
    path: PathBuf,
}

impl AttachFile {
    fn create(candidates: &[PathBuf]) -> Result<AttachFile> {
        let mut last_err = None;
        for path in candidates {
            match OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
            {
                Ok(_) => {
                    debug!(path = %path.display(), "created attach file");
                    return Ok(AttachFile { path: path.clone() });
                }
                Err(err) => {
                    debug!(path = %path.display(), %err, "cannot create attach file here");
                    last_err = Some((path, err));
                }
            }
        }

        match last_err {
            Some((path, err)) => Err(Error::io_context(
                format_args!("creating attach file {}", path.display()),
                err,
            )),
            None => Err(Error::invalid_input("no location for the attach file")),
        }
    }
}

impl Drop for AttachFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), %err, "failed to remove attach file");
            }
        }
    }
}

/// Temporarily take on the target's effective uid/gid when running as root,
/// so the VM accepts our peer credentials and attach file.
struct Impersonation {
    uid: libc::uid_t,
    gid: libc::gid_t,
}

impl Impersonation {
    fn assume(status: &ProcStatus) -> Result<Option<Impersonation>> {
        let (euid, egid) = unsafe { (libc::geteuid(), libc::getegid()) };
        if euid != 0 || (status.uid == euid && status.gid == egid) {
            return Ok(None);
        }

        if unsafe { libc::setegid(status.gid) } != 0 {
            return Err(Error::io_context(
                "setegid",
                std::io::Error::last_os_error(),
            ));
        }
        if unsafe { libc::seteuid(status.uid) } != 0 {
            let err = std::io::Error::last_os_error();
            if unsafe { libc::setegid(egid) } != 0 {
                warn!(
                    err = %std::io::Error::last_os_error(),
                    "failed to restore effective gid"
                );
            }
            return Err(Error::io_context("seteuid", err));
        }

        debug!(uid = status.uid, gid = status.gid, "switched effective ids");
        Ok(Some(Impersonation {
            uid: euid,
            gid: egid,
        }))
    }
}

impl Drop for Impersonation {
    fn drop(&mut self) {
        // Regain root before restoring the group.
        let restored = unsafe { libc::seteuid(self.uid) == 0 && libc::setegid(self.gid) == 0 };
        if !restored {
            warn!(
                err = %std::io::Error::last_os_error(),
                "failed to restore effective ids"
            );
        }
    }
}

fn send_quit(pid: i32) -> Result<()> {
    debug!(pid, "sending SIGQUIT");
    if unsafe { libc::kill(pid, libc::SIGQUIT) } == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Err(Error::process_not_found(pid)),
        Some(libc::EPERM) => Err(Error::permission_denied(format_args!(
            "signalling process {pid}"
        ))),
        _ => Err(Error::from(err)),
    }
}

/// Enumerate VMs that publish performance data under `tmp_dir`.
pub(super) fn list(provider: &str, tmp_dir: &Path) -> Result<Vec<VirtualMachineDescriptor>> {
    let entries = match fs::read_dir(tmp_dir) {
        Ok(entries) => entries,
        Err(err) => {
            return Err(Error::io_context(
                format_args!("reading {}", tmp_dir.display()),
                err,
            ));
        }
    };

    let mut pids = Vec::new();
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with("hsperfdata_") {
            continue;
        }
        // Other users' directories are commonly unreadable; skip them.
        let Ok(perf_entries) = fs::read_dir(entry.path()) else {
            continue;
        };
        pids.extend(
            perf_entries
                .flatten()
                .filter_map(|perf| perf.file_name().to_str()?.parse::<i32>().ok()),
        );
    }
    pids.sort_unstable();
    pids.dedup();

    let mut descriptors = Vec::with_capacity(pids.len());
    for pid in pids {
        // Stale perf files outlive crashed VMs.
        let Ok(process) = Process::from_pid(pid) else {
            continue;
        };
        let display_name = process
            .cmdline()
            .ok()
            .and_then(|args| display_name_from_cmdline(&args))
            .unwrap_or_else(|| pid.to_string());
        descriptors.push(VirtualMachineDescriptor::new(
            provider,
            pid.to_string(),
            display_name,
        ));
    }

    Ok(descriptors)
}
