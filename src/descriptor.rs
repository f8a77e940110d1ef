use std::fmt;
use std::path::Path;

use crate::{Error, Result};

/// A VM that a provider can attach to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualMachineDescriptor {
    id: String,
    display_name: String,
    provider: String,
}

impl VirtualMachineDescriptor {
    pub fn new(
        provider: impl Into<String>,
        id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            provider: provider.into(),
        }
    }

    /// Identifier accepted by `attach`; the pid for HotSpot.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Main class, jar or module of the VM; falls back to the id.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    fn matches(&self, name: &str) -> bool {
        if self.display_name == name {
            return true;
        }
        // `Main` matches `com.example.Main`, `app.jar` matches `/srv/app.jar`.
        self.display_name
            .rsplit_once('.')
            .is_some_and(|(_, simple)| simple == name)
            || Path::new(&self.display_name)
                .file_name()
                .is_some_and(|file| file == name)
    }
}

impl fmt::Display for VirtualMachineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.display_name)
    }
}

/// Pick the single descriptor whose display name matches `name`.
pub(crate) fn resolve<'a>(
    name: &str,
    descriptors: &'a [VirtualMachineDescriptor],
) -> Result<&'a VirtualMachineDescriptor> {
    let mut matches = descriptors.iter().filter(|d| d.matches(name));
    let Some(first) = matches.next() else {
        return Err(Error::not_supported(format_args!(
            "no attachable VM matches {name:?}"
        )));
    };

    let rest: Vec<&str> = matches.map(VirtualMachineDescriptor::id).collect();
    if !rest.is_empty() {
        return Err(Error::invalid_input(format_args!(
            "{name:?} is ambiguous: matches pids {}, {}",
            first.id(),
            rest.join(", ")
        )));
    }
    Ok(first)
}

// JVM options that consume the following argument.
const OPTIONS_WITH_VALUE: &[&str] = &[
    "-cp",
    "-classpath",
    "--class-path",
    "-p",
    "--module-path",
    "--upgrade-module-path",
    "--add-modules",
    "--add-opens",
    "--add-exports",
    "--add-reads",
    "--patch-module",
    "--limit-modules",
];

/// Derive a display name from a JVM command line: the main class, the
/// `-jar` file or the `-m` module, as `jps` would show it.
pub(crate) fn display_name_from_cmdline(args: &[String]) -> Option<String> {
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-jar" => return iter.next().cloned(),
            "-m" | "--module" => {
                return iter
                    .next()
                    .map(|module| module.split('/').next_back().unwrap_or(module).to_string());
            }
            opt if OPTIONS_WITH_VALUE.contains(&opt) => {
                iter.next();
            }
            opt if opt.starts_with("--module=") => {
                let module = &opt["--module=".len()..];
                return Some(module.split('/').next_back().unwrap_or(module).to_string());
            }
            opt if opt.starts_with('-') => {}
            main => return Some(main.to_string()),
        }
    }
    None
}
