use std::path::PathBuf;

use jvm_attach_build::{library_filename, read_crate_metadata};

#[test]
fn reads_fixture_metadata() {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..");
    let fixture = root.join("fixtures/agent");

    let meta = read_crate_metadata(fixture)
        .expect("read fixture metadata")
        .expect("fixture metadata ok");
    assert_eq!(meta.package_name, "jvm-attach-fixture-agent");
    assert_eq!(meta.options.as_deref(), Some("fixture"));
    assert!(meta.manifest_path.ends_with("fixtures/agent/Cargo.toml"));
}

#[test]
fn rejects_crates_that_are_not_cdylib() {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));

    let err = read_crate_metadata(&root)
        .expect("manifest exists")
        .expect_err("build helper is an rlib");
    assert!(err.to_string().contains("crate is not configured as cdylib"));
}

#[test]
fn missing_manifest_yields_none() {
    let dir = std::env::temp_dir().join("jvm-attach-build-no-manifest");
    let _ = std::fs::create_dir_all(&dir);
    assert!(read_crate_metadata(&dir).is_none());
}

#[test]
fn library_filename_formats() {
    let name = library_filename("foo-bar");
    if cfg!(windows) {
        assert_eq!(name, "foo_bar.dll");
    } else if cfg!(target_os = "macos") {
        assert_eq!(name, "libfoo_bar.dylib");
    } else {
        assert_eq!(name, "libfoo_bar.so");
    }
}
