use std::path::{Path, PathBuf};

use crate::provider::VirtualMachine;
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum AgentSource {
    /// Native library at an absolute path.
    Path(PathBuf),
    /// Native library name, searched on the target's library path.
    Library(String),
    /// Java agent JAR loaded through `instrument`.
    Jar(PathBuf),
}

/// Reference to an agent the target VM should load.
#[derive(Clone, Debug)]
pub struct Agent {
    source: AgentSource,
    options: Option<String>,
}

impl Agent {
    /// Native agent at `path`.
    ///
    /// The path is resolved by the target, which may live in another mount
    /// namespace, so it is not checked here. Relative paths are made
    /// absolute against the current directory.
    ///
    /// # Examples
    /// ```no_run
    /// # use jvm_attach::Agent;
    /// let agent = Agent::from_path("/usr/local/scope/lib/libscope.so")?;
    /// # Ok::<(), jvm_attach::Error>(())
    /// ```
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Agent> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::invalid_input("agent path is empty"));
        }
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        Ok(Agent::new(AgentSource::Path(path)))
    }

    /// Native agent looked up by name (`foo` loads `libfoo.so`).
    pub fn from_library_name(name: impl Into<String>) -> Result<Agent> {
        let name = name.into();
        if name.is_empty() || name.contains('/') {
            return Err(Error::invalid_input(
                "library name must be non-empty and contain no path separator",
            ));
        }
        Ok(Agent::new(AgentSource::Library(name)))
    }

    /// Java agent JAR with an `Agent-Class` manifest attribute.
    pub fn from_jar<P: AsRef<Path>>(jar: P) -> Result<Agent> {
        let jar = jar.as_ref();
        if !jar.is_absolute() {
            return Err(Error::invalid_input("agent JAR path must be absolute"));
        }
        Ok(Agent::new(AgentSource::Jar(jar.to_path_buf())))
    }

    /// Resolve a native agent built from a Rust `cdylib` crate.
    ///
    /// The path may be a directory containing Cargo.toml or a direct path to
    /// Cargo.toml. If the library is not found, `cargo build` runs once.
    /// Default options can be set in the manifest:
    /// ```text
    /// [package.metadata.jvm-attach]
    /// options = "verbose"
    /// ```
    pub fn from_crate<P: AsRef<Path>>(path: P) -> Result<Agent> {
        let crate_path = path.as_ref();

        let dylib = if let Some(result) = jvm_attach_build::read_cdylib_file(crate_path) {
            result.map_err(|err| {
                Error::invalid_input(format_args!("failed to read agent crate: {err}"))
            })?
        } else {
            jvm_attach_build::build_cdylib(crate_path).map_err(|err| {
                Error::invalid_input(format_args!("failed to build agent crate: {err}"))
            })?
        };

        Ok(Agent {
            source: AgentSource::Path(dylib.path),
            options: dylib.options,
        })
    }

    fn new(source: AgentSource) -> Agent {
        Agent {
            source,
            options: None,
        }
    }

    /// Set the option string handed to the agent's attach hook.
    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Return the option string, if any.
    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }

    /// Path of a native or JAR agent; `None` for library-name agents.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            AgentSource::Path(path) | AgentSource::Jar(path) => Some(path),
            AgentSource::Library(_) => None,
        }
    }

    /// Load this agent into an attached VM.
    pub fn load_into<V: VirtualMachine + ?Sized>(&self, vm: &mut V) -> Result<()> {
        let options = self.options.as_deref();
        match &self.source {
            AgentSource::Path(path) => vm.load_agent_path(path, options),
            AgentSource::Library(name) => vm.load_agent_library(name, options),
            AgentSource::Jar(jar) => vm.load_agent(jar, options),
        }
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            AgentSource::Path(path) => write!(f, "{}", path.display()),
            AgentSource::Library(name) => write!(f, "library {name}"),
            AgentSource::Jar(jar) => write!(f, "jar {}", jar.display()),
        }
    }
}

#[cfg(test)]
impl Agent {
    pub(crate) fn source(&self) -> &AgentSource {
        &self.source
    }
}
