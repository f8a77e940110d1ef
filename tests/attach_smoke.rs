#![cfg(target_os = "linux")]

use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use jvm_attach::{Agent, AttachLauncher, AttachProvider, HotSpotProvider, VirtualMachine};

// Needs a JDK on PATH and builds the fixture agent; opt in with JVM_ATTACH_SMOKE=1.
fn smoke_enabled() -> bool {
    if std::env::var_os("JVM_ATTACH_SMOKE").is_none() {
        eprintln!("skipping attach smoke test (set JVM_ATTACH_SMOKE=1)");
        return false;
    }
    if Command::new("java").arg("-version").output().is_err() {
        eprintln!("skipping attach smoke test (no java on PATH)");
        return false;
    }
    true
}

fn spawn_sleeper(root: &Path) -> Child {
    Command::new("java")
        .arg(root.join("fixtures/target/Sleeper.java"))
        .arg("30000")
        .spawn()
        .expect("failed to spawn fixture JVM")
}

// The VM publishes perf data once it is far enough along to handle SIGQUIT.
fn wait_for_vm(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(15);
    while Instant::now() < deadline {
        let found = jvm_attach::list()
            .map(|vms| vms.iter().any(|vm| vm.id() == pid.to_string()))
            .unwrap_or(false);
        if found {
            std::thread::sleep(Duration::from_millis(500));
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("fixture JVM {pid} never published perf data");
}

fn fixture_agent(root: &Path) -> Agent {
    let status = Command::new("cargo")
        .args(["build", "-p", "jvm-attach-fixture-agent"])
        .current_dir(root)
        .status()
        .expect("failed to build fixture agent");
    assert!(status.success());
    Agent::from_crate(root.join("fixtures/agent")).expect("fixture agent")
}

fn stamp_path() -> PathBuf {
    std::env::temp_dir().join(format!(
        "jvm-attach-{}-{}.stamp",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis()
    ))
}

#[test]
fn loads_fixture_agent_into_live_jvm() {
    if !smoke_enabled() {
        return;
    }

    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let agent = fixture_agent(&root);
    let mut child = spawn_sleeper(&root);
    wait_for_vm(child.id());

    let stamp = stamp_path();
    let stamp_str = stamp.to_str().expect("utf-8 temp dir");
    let launcher = AttachLauncher::new(HotSpotProvider::new(), agent.clone().with_options(stamp_str));
    let mut out = Vec::new();
    let result = launcher.run_with_progress(&child.id().to_string(), &mut out);

    // A failing init hook is reported with its return code.
    let failing = AttachLauncher::new(HotSpotProvider::new(), agent.with_options("fail"))
        .run_with_progress(&child.id().to_string(), &mut std::io::sink());

    let mut vm = HotSpotProvider::new()
        .attach(&child.id().to_string())
        .expect("re-attach");
    let props = vm.system_properties().expect("system properties");
    vm.detach().expect("detach");

    let _ = child.kill();
    let _ = child.wait();

    result.expect("agent should load");
    assert_eq!(std::fs::read(&stamp).expect("read stamp"), b"ok");
    let _ = std::fs::remove_file(&stamp);

    let err = failing.expect_err("init hook reports failure");
    assert!(err.is_agent_load_failed());
    assert!(err.agent_return_code().is_some());

    assert!(props.get("java.version").is_some());
    assert!(String::from_utf8(out).unwrap().contains("agent loaded into"));
}

#[test]
fn missing_library_fails_against_live_jvm() {
    if !smoke_enabled() {
        return;
    }

    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let mut child = spawn_sleeper(&root);
    wait_for_vm(child.id());

    let agent = Agent::from_path("/nonexistent/jvm-attach/libmissing.so").unwrap();
    let result = AttachLauncher::new(HotSpotProvider::new(), agent)
        .run_with_progress(&child.id().to_string(), &mut std::io::sink());

    let _ = child.kill();
    let _ = child.wait();

    assert!(result.unwrap_err().is_agent_load_failed());
}
