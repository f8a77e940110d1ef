//! The attach seam: a provider opens sessions to target VMs, and a session
//! executes attach commands until it is detached.
//!
//! Only [`VirtualMachine::execute`] talks to the target. Every higher-level
//! operation is written once on top of it, so an alternative provider only
//! has to move bytes.

use std::path::Path;

use crate::{Error, Properties, Result, VirtualMachineDescriptor};

/// Completion status reported by the target for `ATTACH_ERROR_BADVERSION`.
const ATTACH_ERROR_BADVERSION: i32 = 101;

const MANAGEMENT_PREFIX: &str = "com.sun.management.";
const LOCAL_CONNECTOR_ADDRESS: &str = "com.sun.management.jmxremote.localConnectorAddress";
const RETURN_CODE_PREFIX: &str = "return code: ";

/// Raw reply to one attach command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    status: i32,
    body: String,
}

impl Reply {
    pub fn new(status: i32, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Completion status; zero means the command ran.
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Output following the status line.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Turn a non-zero completion status into the matching error and
    /// return the command output otherwise.
    pub fn into_output(self, command: &str) -> Result<String> {
        if self.status == 0 {
            return Ok(self.body);
        }

        let message = self.body.trim();
        if self.status == ATTACH_ERROR_BADVERSION {
            return Err(Error::io("protocol mismatch with target VM"));
        }
        if command == "load" {
            return Err(if message.is_empty() {
                Error::agent_load("failed to load agent library")
            } else {
                Error::agent_load(format_args!("failed to load agent library: {message}"))
            });
        }
        Err(if message.is_empty() {
            Error::operation_failed(format_args!("command failed in target VM: {command}"))
        } else {
            Error::operation_failed(message)
        })
    }
}

/// Source of attach sessions.
pub trait AttachProvider {
    type Machine: VirtualMachine;

    /// Short provider name, e.g. `"hotspot"`.
    fn name(&self) -> &str;

    /// Enumerate VMs this provider can attach to.
    fn list(&self) -> Result<Vec<VirtualMachineDescriptor>>;

    /// Attach to a VM by pid or display name.
    fn attach(&self, id: &str) -> Result<Self::Machine>;

    /// Attach to a VM returned by [`AttachProvider::list`].
    fn attach_descriptor(&self, descriptor: &VirtualMachineDescriptor) -> Result<Self::Machine> {
        if descriptor.provider() != self.name() {
            return Err(Error::not_supported(format_args!(
                "descriptor belongs to provider {:?}, not {:?}",
                descriptor.provider(),
                self.name()
            )));
        }
        self.attach(descriptor.id())
    }
}

/// An open attach session to one target VM.
///
/// Sessions end with [`VirtualMachine::detach`], which consumes the handle.
pub trait VirtualMachine {
    /// Identifier the session was opened with.
    fn id(&self) -> &str;

    /// Name of the provider that opened this session.
    fn provider_name(&self) -> &str;

    /// Send one command with up to three arguments and return the raw reply.
    fn execute(&mut self, command: &str, args: &[&str]) -> Result<Reply>;

    /// Close the session.
    fn detach(self) -> Result<()>
    where
        Self: Sized;

    /// Load a native agent by absolute path; `Agent_OnAttach` receives `options`.
    fn load_agent_path(&mut self, path: &Path, options: Option<&str>) -> Result<()> {
        let path = path_arg(path)?;
        load_library(self, path, true, options)
    }

    /// Load a native agent by library name, searched on the target's library path.
    fn load_agent_library(&mut self, name: &str, options: Option<&str>) -> Result<()> {
        load_library(self, name, false, options)
    }

    /// Load a Java agent JAR through the target's `instrument` library.
    fn load_agent(&mut self, jar: &Path, options: Option<&str>) -> Result<()> {
        let jar = path_arg(jar)?;
        let args = match options {
            Some(options) => format!("{jar}={options}"),
            None => jar.to_string(),
        };

        match load_library(self, "instrument", false, Some(&args)) {
            Err(err) => match err.agent_return_code().and_then(jplis_message) {
                Some(message) => Err(Error::agent_load(message)),
                None => Err(err),
            },
            ok => ok,
        }
    }

    /// Target system properties.
    fn system_properties(&mut self) -> Result<Properties> {
        let output = self.execute("properties", &[])?.into_output("properties")?;
        Ok(Properties::parse(&output))
    }

    /// Properties maintained by agents running in the target.
    fn agent_properties(&mut self) -> Result<Properties> {
        let output = self
            .execute("agentProperties", &[])?
            .into_output("agentProperties")?;
        Ok(Properties::parse(&output))
    }

    /// Run a diagnostic command in the target and return its output.
    fn execute_jcmd(&mut self, command: &str) -> Result<String> {
        self.execute("jcmd", &[command])?.into_output("jcmd")
    }

    /// Start the JMX management agent with `com.sun.management.*` settings.
    fn start_management_agent(&mut self, properties: &Properties) -> Result<()> {
        let command = management_start_command(properties)?;
        self.execute_jcmd(&command).map(drop)
    }

    /// Start the local JMX connector and return its address.
    fn start_local_management_agent(&mut self) -> Result<String> {
        self.execute_jcmd("ManagementAgent.start_local")?;
        self.agent_properties()?
            .get(LOCAL_CONNECTOR_ADDRESS)
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::operation_failed("local management agent did not publish its address")
            })
    }
}

fn load_library<V: VirtualMachine + ?Sized>(
    vm: &mut V,
    library: &str,
    absolute: bool,
    options: Option<&str>,
) -> Result<()> {
    let absolute = if absolute { "true" } else { "false" };
    let output = vm
        .execute("load", &[library, absolute, options.unwrap_or_default()])?
        .into_output("load")?;
    check_load_result(&output)
}

/// Interpret the body of a successful `load` reply.
///
/// Newer VMs answer `return code: N`; older ones answer just `N`.
fn check_load_result(output: &str) -> Result<()> {
    let Some(line) = output.lines().next().map(str::trim) else {
        return Err(Error::agent_load("target VM did not respond"));
    };
    let code = line.strip_prefix(RETURN_CODE_PREFIX).unwrap_or(line);

    match code.trim().parse::<i32>() {
        Ok(0) => Ok(()),
        Ok(code) => Err(Error::agent_init("Agent_OnAttach failed", code)),
        Err(_) if line.is_empty() => Err(Error::agent_load("target VM did not respond")),
        Err(_) => Err(Error::agent_load(line)),
    }
}

fn jplis_message(code: i32) -> Option<&'static str> {
    match code {
        100 => Some("agent JAR not found or no Agent-Class attribute"),
        101 => Some("unable to add JAR file to system class path"),
        102 => Some("agent JAR loaded but agent failed to initialize"),
        _ => None,
    }
}

fn management_start_command(properties: &Properties) -> Result<String> {
    let mut command = String::from("ManagementAgent.start");
    for (key, value) in properties.iter() {
        let Some(name) = key.strip_prefix(MANAGEMENT_PREFIX) else {
            return Err(Error::invalid_input(format_args!(
                "invalid management option name: {key}"
            )));
        };
        command.push(' ');
        command.push_str(name);
        command.push('=');
        if value.contains(' ') {
            command.push('\'');
            command.push_str(value);
            command.push('\'');
        } else {
            command.push_str(value);
        }
    }
    Ok(command)
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        Error::invalid_input(format_args!("path is not valid UTF-8: {}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_result_formats() {
        assert!(check_load_result("return code: 0\n").is_ok());
        assert!(check_load_result("0\n").is_ok());

        let err = check_load_result("return code: -1\n").unwrap_err();
        assert_eq!(err.agent_return_code(), Some(-1));

        let err = check_load_result("").unwrap_err();
        assert!(err.to_string().contains("did not respond"));

        let err = check_load_result("Could not find agent library /nope.so\n").unwrap_err();
        assert!(err.is_agent_load_failed());
        assert_eq!(err.agent_return_code(), None);
        assert!(err.to_string().contains("/nope.so"));
    }

    #[test]
    fn failed_status_maps_by_command() {
        let err = Reply::new(100, "no such library\n")
            .into_output("load")
            .unwrap_err();
        assert!(err.is_agent_load_failed());
        assert_eq!(err.to_string(), "failed to load agent library: no such library");

        let err = Reply::new(1, "").into_output("jcmd").unwrap_err();
        assert!(err.is_operation_failed());

        let err = Reply::new(101, "").into_output("load").unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn management_command_strips_prefix_and_quotes() {
        let props: Properties = [
            ("com.sun.management.jmxremote.port", "9010"),
            ("com.sun.management.jmxremote.password.file", "/etc/jmx pw"),
        ]
        .into_iter()
        .collect();
        let command = management_start_command(&props).unwrap();
        assert_eq!(
            command,
            "ManagementAgent.start jmxremote.password.file='/etc/jmx pw' jmxremote.port=9010"
        );
    }

    #[test]
    fn management_command_rejects_foreign_keys() {
        let props: Properties = [("java.home", "/x")].into_iter().collect();
        let err = management_start_command(&props).unwrap_err();
        assert!(err.is_invalid_input());
    }
}
