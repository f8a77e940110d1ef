//! Dynamic attach to running HotSpot JVMs.
//!
//! This crate speaks the HotSpot attach protocol directly (no JDK tools
//! needed) and can ask a running VM to load a native agent, a Java agent
//! JAR, or run diagnostic commands.
//!
//! # Quickstart
//! ```no_run
//! use jvm_attach::{attach, Agent, VirtualMachine};
//!
//! let mut vm = attach("4242")?;
//! let agent = Agent::from_path("/path/to/libagent.so")?.with_options("verbose");
//! let loaded = agent.load_into(&mut vm);
//! vm.detach()?;
//! loaded?;
//! # Ok::<(), jvm_attach::Error>(())
//! ```
//!
//! # One-shot loading
//! [`AttachLauncher`] wraps attach, load and detach, and always detaches
//! once the attach succeeded:
//! ```no_run
//! use jvm_attach::{Agent, AttachLauncher, HotSpotProvider};
//!
//! let agent = Agent::from_path("/usr/local/scope/lib/libscope.so")?;
//! AttachLauncher::new(HotSpotProvider::new(), agent).run("com.example.Server")?;
//! # Ok::<(), jvm_attach::Error>(())
//! ```
//!
//! # Inspecting a VM
//! ```no_run
//! use jvm_attach::{attach, VirtualMachine};
//!
//! let mut vm = attach("4242")?;
//! let props = vm.system_properties()?;
//! println!("java.version = {:?}", props.get("java.version"));
//! println!("{}", vm.execute_jcmd("Thread.print")?);
//! vm.detach()?;
//! # Ok::<(), jvm_attach::Error>(())
//! ```

mod agent;
mod config;
mod descriptor;
mod error;
mod hotspot;
mod launcher;
mod process;
mod properties;
mod provider;

pub use agent::Agent;
pub use config::{Config, ConfigError, ConfigOverrides, DEFAULT_LIBRARY_PATH};
pub use descriptor::VirtualMachineDescriptor;
pub use error::{Error, ErrorKind, Result};
pub use hotspot::{DEFAULT_ATTACH_TIMEOUT, HotSpotProvider, HotSpotVirtualMachine};
pub use launcher::AttachLauncher;
pub use process::Process;
pub use properties::Properties;
pub use provider::{AttachProvider, Reply, VirtualMachine};

/// List VMs that can be attached to with the default provider.
///
/// # Examples
/// ```no_run
/// for vm in jvm_attach::list()? {
///     println!("{} {}", vm.id(), vm.display_name());
/// }
/// # Ok::<(), jvm_attach::Error>(())
/// ```
pub fn list() -> Result<Vec<VirtualMachineDescriptor>> {
    hotspot::default_provider()?.list()
}

/// Attach to a VM by pid or display name with the default provider.
pub fn attach(id: &str) -> Result<HotSpotVirtualMachine> {
    hotspot::default_provider()?.attach(id)
}

/// Attach to a VM returned by [`list`].
pub fn attach_descriptor(descriptor: &VirtualMachineDescriptor) -> Result<HotSpotVirtualMachine> {
    hotspot::default_provider()?.attach_descriptor(descriptor)
}

/// Load the configured agent into `target` and detach, printing progress
/// to stdout.
pub fn run(target: &str, config: &Config) -> Result<()> {
    config.validate().map_err(Error::invalid_input)?;
    AttachLauncher::new(config.provider(), config.agent()?).run(target)
}
