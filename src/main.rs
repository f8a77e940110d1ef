use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use jvm_attach::{AttachProvider, Config, ConfigError, ConfigOverrides, Error, ErrorKind};

/// Attach to a running JVM and load a native agent into it.
#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
    /// Pid or display name (main class, jar or module) of the target JVM.
    #[clap(required_unless_present = "list")]
    target: Option<String>,

    /// Absolute path of the agent library, as seen by the target.
    #[clap(short, long, env = "JVM_ATTACH_LIBRARY")]
    library: Option<PathBuf>,

    /// Option string passed to Agent_OnAttach.
    #[clap(short, long)]
    options: Option<String>,

    /// TOML configuration file.
    #[clap(short, long, env = "JVM_ATTACH_CONFIG")]
    config: Option<PathBuf>,

    /// Milliseconds to wait for the target's attach listener.
    #[clap(short, long = "timeout")]
    timeout_ms: Option<u64>,

    /// Directory holding attach sockets and perf data, instead of the target's /tmp.
    #[clap(long)]
    tmp_dir: Option<PathBuf>,

    /// List attachable JVMs and exit.
    #[clap(long, conflicts_with = "target")]
    list: bool,

    /// Log attach handshake details to stderr.
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    debug!(?config, "effective configuration");

    let result = match &args.target {
        Some(target) if !args.list => jvm_attach::run(target, &config),
        _ => list(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::from(exit_code(err.kind()))
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<Config, ConfigError> {
    let base = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let config = base.merge(ConfigOverrides {
        library_path: args.library.clone(),
        options: args.options.clone(),
        attach_timeout_ms: args.timeout_ms,
        tmp_dir: args.tmp_dir.clone(),
    });
    config.validate()?;
    Ok(config)
}

fn list(config: &Config) -> jvm_attach::Result<()> {
    for descriptor in config.provider().list()? {
        println!("{descriptor}");
    }
    Ok(())
}

fn report(err: &Error) {
    eprintln!("error: {err}");
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }
}

const EXIT_USAGE: u8 = 64;

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::NotSupported => 2,
        ErrorKind::Io => 3,
        ErrorKind::AgentLoadFailed => 4,
        ErrorKind::OperationFailed => 5,
        _ => EXIT_USAGE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_failure_kind_has_its_own_exit_code() {
        let codes = [
            (ErrorKind::NotSupported, 2),
            (ErrorKind::Io, 3),
            (ErrorKind::AgentLoadFailed, 4),
            (ErrorKind::OperationFailed, 5),
            (ErrorKind::InvalidInput, EXIT_USAGE),
        ];
        for (kind, code) in codes {
            assert_eq!(exit_code(kind), code, "{kind:?}");
        }
    }

    #[test]
    fn io_errors_exit_with_three() {
        let err = Error::from(std::io::Error::other("boom"));
        assert_eq!(exit_code(err.kind()), 3);
    }
}
