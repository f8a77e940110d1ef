//! HotSpot dynamic attach over the per-VM Unix domain socket.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use tracing::debug;

use crate::provider::{AttachProvider, Reply, VirtualMachine};
use crate::{Error, Result, VirtualMachineDescriptor};

#[cfg(target_os = "linux")]
mod linux;
mod protocol;

const PROVIDER_NAME: &str = "hotspot";

/// Default time to wait for a VM to start its attach listener.
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(10);

/// Attach provider for HotSpot-based VMs.
///
/// # Examples
/// ```no_run
/// use std::path::Path;
/// use jvm_attach::{AttachProvider, HotSpotProvider, VirtualMachine};
///
/// let provider = HotSpotProvider::new();
/// let mut vm = provider.attach("4242")?;
/// let loaded = vm.load_agent_path(Path::new("/opt/agent/libagent.so"), None);
/// vm.detach()?;
/// loaded?;
/// # Ok::<(), jvm_attach::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct HotSpotProvider {
    attach_timeout: Duration,
    tmp_dir: Option<PathBuf>,
}

impl Default for HotSpotProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl HotSpotProvider {
    pub fn new() -> Self {
        Self {
            attach_timeout: DEFAULT_ATTACH_TIMEOUT,
            tmp_dir: None,
        }
    }

    /// How long to wait for the target to bring up its attach listener.
    pub fn with_attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = timeout;
        self
    }

    /// Look for sockets, attach files and perf data under `dir` instead of
    /// the target's own `/tmp`.
    pub fn with_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = Some(dir.into());
        self
    }

    pub fn attach_timeout(&self) -> Duration {
        self.attach_timeout
    }

    pub fn tmp_dir(&self) -> Option<&Path> {
        self.tmp_dir.as_deref()
    }

    fn resolve_pid(&self, id: &str) -> Result<i32> {
        match id.parse::<i32>() {
            // No process carries such a pid; never let it reach kill().
            Ok(pid) if pid <= 0 => return Err(Error::process_not_found(pid)),
            Ok(pid) => return Ok(pid),
            Err(_) => {}
        }

        let descriptors = self.list()?;
        let descriptor = crate::descriptor::resolve(id, &descriptors)?;
        debug!(name = id, pid = descriptor.id(), "resolved display name");
        descriptor
            .id()
            .parse()
            .map_err(|_| Error::invalid_input(format_args!("bad pid {:?}", descriptor.id())))
    }
}

#[cfg(target_os = "linux")]
impl AttachProvider for HotSpotProvider {
    type Machine = HotSpotVirtualMachine;

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn list(&self) -> Result<Vec<VirtualMachineDescriptor>> {
        let tmp = self.tmp_dir.as_deref().unwrap_or(Path::new("/tmp"));
        linux::list(PROVIDER_NAME, tmp)
    }

    fn attach(&self, id: &str) -> Result<HotSpotVirtualMachine> {
        let pid = self.resolve_pid(id)?;
        let process = crate::Process::from_pid(pid)?;
        let target = linux::Target::locate(process, self.tmp_dir.as_deref())?;
        target.ensure_listener(self.attach_timeout)?;
        target.check_socket_owner()?;

        debug!(id, pid, "attached");
        Ok(HotSpotVirtualMachine {
            id: id.to_string(),
            target,
            detached: false,
        })
    }
}

#[cfg(not(target_os = "linux"))]
impl AttachProvider for HotSpotProvider {
    type Machine = HotSpotVirtualMachine;

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn list(&self) -> Result<Vec<VirtualMachineDescriptor>> {
        Err(unsupported_platform())
    }

    fn attach(&self, _id: &str) -> Result<HotSpotVirtualMachine> {
        Err(unsupported_platform())
    }
}

fn unsupported_platform() -> Error {
    Error::not_supported(format_args!(
        "dynamic attach is not implemented on {}",
        std::env::consts::OS
    ))
}

/// Open attach session to a HotSpot VM.
///
/// Every command uses its own connection; detaching only retires the handle.
/// Dropping an undetached session detaches it.
#[derive(Debug)]
pub struct HotSpotVirtualMachine {
    id: String,
    #[cfg(target_os = "linux")]
    target: linux::Target,
    detached: bool,
}

impl HotSpotVirtualMachine {
    /// Pid of the target process.
    #[cfg(target_os = "linux")]
    pub fn pid(&self) -> i32 {
        self.target.pid()
    }

    fn retire(&mut self) {
        if !self.detached {
            self.detached = true;
            debug!(id = %self.id, "detached");
        }
    }
}

impl VirtualMachine for HotSpotVirtualMachine {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    #[cfg(target_os = "linux")]
    fn execute(&mut self, command: &str, args: &[&str]) -> Result<Reply> {
        let request = protocol::encode_request(command, args)?;
        debug!(id = %self.id, command, ?args, "sending attach command");
        let mut stream = self.target.connect()?;
        let reply = protocol::round_trip(&mut stream, &request)?;
        debug!(id = %self.id, command, status = reply.status(), "attach command completed");
        Ok(reply)
    }

    #[cfg(not(target_os = "linux"))]
    fn execute(&mut self, _command: &str, _args: &[&str]) -> Result<Reply> {
        Err(unsupported_platform())
    }

    fn detach(mut self) -> Result<()> {
        self.retire();
        Ok(())
    }
}

impl Drop for HotSpotVirtualMachine {
    fn drop(&mut self) {
        self.retire();
    }
}

static PROVIDER: OnceLock<Result<HotSpotProvider>> = OnceLock::new();

/// Process-wide provider with default settings.
pub(crate) fn default_provider() -> Result<&'static HotSpotProvider> {
    PROVIDER
        .get_or_init(|| {
            if cfg!(target_os = "linux") {
                Ok(HotSpotProvider::new())
            } else {
                Err(unsupported_platform())
            }
        })
        .as_ref()
        .map_err(Clone::clone)
}
