//! Locate (or build) the shared library produced by a Rust `cdylib` agent
//! crate, and read the agent settings from its manifest.

use std::path::{Path, PathBuf};
use std::process::Command;

//=== Error types ===

#[derive(Debug)]
pub struct BuildError {
    message: String,
}

impl BuildError {
    fn new<M: AsRef<str>>(msg: M) -> Self {
        Self {
            message: msg.as_ref().to_string(),
        }
    }
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BuildError {}

type Result<T> = std::result::Result<T, BuildError>;

//=== Metadata ===

/// A built agent library and the options declared for it.
#[derive(Debug)]
pub struct CdylibInfo {
    pub path: PathBuf,
    pub options: Option<String>,
}

#[derive(Debug)]
pub struct CrateMetadata {
    pub package_name: String,
    /// `[package.metadata.jvm-attach] options`.
    pub options: Option<String>,
    pub manifest_path: PathBuf,
    pub crate_dir: PathBuf,
    pub target_dir: PathBuf,
    pub cdylib_filename: String,
    pub cdylib_path: Option<PathBuf>,
}

/// Return the already-built library of an agent crate.
///
/// `None` means there is no manifest, or the crate has not been built yet.
pub fn read_cdylib_file(crate_path: &Path) -> Option<Result<CdylibInfo>> {
    let meta = match read_crate_metadata(crate_path)? {
        Ok(meta) => meta,
        Err(err) => return Some(Err(err)),
    };

    Some(Ok(CdylibInfo {
        path: meta.cdylib_path?,
        options: meta.options,
    }))
}

/// Read cdylib metadata from a crate manifest without building it.
pub fn read_crate_metadata<P: AsRef<Path>>(crate_path: P) -> Option<Result<CrateMetadata>> {
    let manifest_path = if crate_path.as_ref().is_dir() {
        crate_path.as_ref().join("Cargo.toml")
    } else {
        crate_path.as_ref().to_path_buf()
    };

    if !manifest_path.is_file() {
        return None;
    }

    Some(parse_manifest(manifest_path))
}

fn parse_manifest(manifest_path: PathBuf) -> Result<CrateMetadata> {
    let manifest_src = std::fs::read_to_string(&manifest_path)
        .map_err(|e| BuildError::new(format!("failed to read Cargo.toml: {e}")))?;
    let manifest: toml::Value = toml::from_str(&manifest_src)
        .map_err(|e| BuildError::new(format!("failed to parse Cargo.toml: {e}")))?;

    let package = manifest
        .get("package")
        .ok_or_else(|| BuildError::new("missing [package] section"))?;
    let package_name = package
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BuildError::new("missing [package].name"))?;

    let is_cdylib = manifest
        .get("lib")
        .and_then(|l| l.get("crate-type"))
        .and_then(|v| v.as_array())
        .is_some_and(|arr| arr.iter().any(|v| v.as_str() == Some("cdylib")));
    if !is_cdylib {
        return Err(BuildError::new(
            "crate is not configured as cdylib; add [lib] crate-type = [\"cdylib\"]",
        ));
    }

    let options = package
        .get("metadata")
        .and_then(|m| m.get("jvm-attach"))
        .and_then(|m| m.get("options"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let crate_dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| BuildError::new("invalid manifest path"))?;
    let target_dir = resolve_target_dir(&crate_dir);
    let cdylib_filename = library_filename(package_name);
    let cdylib_path = find_cdylib_in_targets(&crate_dir, &target_dir, &cdylib_filename);

    Ok(CrateMetadata {
        package_name: package_name.to_string(),
        options,
        manifest_path,
        crate_dir,
        target_dir,
        cdylib_filename,
        cdylib_path,
    })
}

//=== Build ===

/// Build an agent crate and return its library path and options.
///
/// # Examples
/// ```no_run
/// use jvm_attach_build::build_cdylib;
///
/// let info = build_cdylib("path/to/agent-crate").unwrap();
/// ```
pub fn build_cdylib<P: AsRef<Path>>(crate_path: P) -> Result<CdylibInfo> {
    let meta = match read_crate_metadata(crate_path) {
        Some(Ok(meta)) => meta,
        Some(Err(err)) => return Err(err),
        None => return Err(BuildError::new("missing Cargo.toml")),
    };

    let status = Command::new("cargo")
        .arg("build")
        .arg("--manifest-path")
        .arg(&meta.manifest_path)
        .status()
        .map_err(|e| BuildError::new(format!("failed to invoke cargo: {e}")))?;
    if !status.success() {
        return Err(BuildError::new("cargo build failed"));
    }

    let path = find_cdylib_in_targets(&meta.crate_dir, &meta.target_dir, &meta.cdylib_filename)
        .ok_or_else(|| BuildError::new("cdylib not found after build"))?;

    Ok(CdylibInfo {
        path,
        options: meta.options,
    })
}

/// Platform file name of the library a cdylib crate produces.
pub fn library_filename(crate_name: &str) -> String {
    let name = crate_name.replace('-', "_");

    if cfg!(windows) {
        format!("{name}.dll")
    } else if cfg!(target_os = "macos") {
        format!("lib{name}.dylib")
    } else {
        format!("lib{name}.so")
    }
}

fn resolve_target_dir(crate_dir: &Path) -> PathBuf {
    std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| crate_dir.join("target"))
}

// Workspace members build into an ancestor's target/, so walk up a few levels.
fn find_cdylib_in_targets(crate_dir: &Path, target_dir: &Path, filename: &str) -> Option<PathBuf> {
    let candidates = std::iter::once(target_dir.to_path_buf())
        .chain(crate_dir.ancestors().take(4).map(|dir| dir.join("target")));

    for root in candidates {
        for profile in ["release", "debug"] {
            let candidate = root.join(profile).join(filename);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    None
}
