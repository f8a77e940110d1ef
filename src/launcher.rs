use std::io::Write;

use tracing::{debug, warn};

use crate::provider::{AttachProvider, VirtualMachine};
use crate::{Agent, Result};

/// Attach to a VM, load one agent, detach.
///
/// Detach runs after every successful attach, whether the load worked or
/// not. If both fail, the load error wins and the detach error is logged.
///
/// # Examples
/// ```no_run
/// use jvm_attach::{Agent, AttachLauncher, HotSpotProvider};
///
/// let agent = Agent::from_path("/usr/local/scope/lib/libscope.so")?;
/// let launcher = AttachLauncher::new(HotSpotProvider::new(), agent);
/// launcher.run("4242")?;
/// # Ok::<(), jvm_attach::Error>(())
/// ```
#[derive(Debug)]
pub struct AttachLauncher<P> {
    provider: P,
    agent: Agent,
}

impl<P: AttachProvider> AttachLauncher<P> {
    pub fn new(provider: P, agent: Agent) -> Self {
        Self { provider, agent }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Run against `target`, writing progress lines to stdout.
    pub fn run(&self, target: &str) -> Result<()> {
        self.run_with_progress(target, &mut std::io::stdout().lock())
    }

    /// Run against `target`, writing progress lines to `out`.
    ///
    /// `target` is handed to the provider verbatim. Progress output is best
    /// effort and never fails the run.
    pub fn run_with_progress<W: Write + ?Sized>(&self, target: &str, out: &mut W) -> Result<()> {
        progress(out, format_args!("attaching to {target}"));
        let mut vm = self.provider.attach(target)?;
        let id = vm.id().to_string();
        progress(out, format_args!("attached to {id} via {}", vm.provider_name()));

        progress(out, format_args!("loading agent {}", self.agent));
        let loaded = self.agent.load_into(&mut vm);

        progress(out, format_args!("detaching from {id}"));
        let detached = vm.detach();

        match (loaded, detached) {
            (Ok(()), Ok(())) => {
                progress(out, format_args!("agent loaded into {id}"));
                Ok(())
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), Err(err)) => Err(err),
            (Err(err), Err(detach_err)) => {
                warn!(id, %detach_err, "detach failed after load failure");
                Err(err)
            }
        }
    }
}

fn progress<W: Write + ?Sized>(out: &mut W, line: std::fmt::Arguments<'_>) {
    if let Err(err) = writeln!(out, "{line}") {
        debug!(%err, "dropping progress output");
    }
}
