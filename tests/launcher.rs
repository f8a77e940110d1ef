use std::cell::RefCell;
use std::rc::Rc;

use jvm_attach::{
    Agent, AttachLauncher, AttachProvider, Error, ErrorKind, Reply, Result, VirtualMachine,
    VirtualMachineDescriptor,
};

#[derive(Default)]
struct Log {
    attaches: Vec<String>,
    commands: Vec<Vec<String>>,
    detaches: usize,
}

#[derive(Clone)]
struct ScriptedProvider {
    log: Rc<RefCell<Log>>,
    refuse_attach: bool,
    load_reply: Reply,
    fail_detach: bool,
}

impl ScriptedProvider {
    fn new(load_reply: Reply) -> Self {
        Self {
            log: Rc::default(),
            refuse_attach: false,
            load_reply,
            fail_detach: false,
        }
    }
}

struct ScriptedVm {
    id: String,
    log: Rc<RefCell<Log>>,
    load_reply: Reply,
    fail_detach: bool,
}

fn io_error(msg: &str) -> Error {
    Error::from(std::io::Error::other(msg.to_string()))
}

impl AttachProvider for ScriptedProvider {
    type Machine = ScriptedVm;

    fn name(&self) -> &str {
        "scripted"
    }

    fn list(&self) -> Result<Vec<VirtualMachineDescriptor>> {
        Ok(vec![VirtualMachineDescriptor::new("scripted", "42", "Main")])
    }

    fn attach(&self, id: &str) -> Result<ScriptedVm> {
        self.log.borrow_mut().attaches.push(id.to_string());
        if self.refuse_attach {
            return Err(io_error("no such process"));
        }
        Ok(ScriptedVm {
            id: id.to_string(),
            log: self.log.clone(),
            load_reply: self.load_reply.clone(),
            fail_detach: self.fail_detach,
        })
    }
}

impl VirtualMachine for ScriptedVm {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn execute(&mut self, command: &str, args: &[&str]) -> Result<Reply> {
        let mut entry = vec![command.to_string()];
        entry.extend(args.iter().map(|a| a.to_string()));
        self.log.borrow_mut().commands.push(entry);
        Ok(self.load_reply.clone())
    }

    fn detach(self) -> Result<()> {
        self.log.borrow_mut().detaches += 1;
        if self.fail_detach {
            return Err(io_error("detach failed"));
        }
        Ok(())
    }
}

fn native_agent() -> Agent {
    Agent::from_path("/usr/local/scope/lib/libscope.so").unwrap()
}

fn run(provider: &ScriptedProvider, agent: Agent, target: &str) -> (Result<()>, String) {
    let launcher = AttachLauncher::new(provider.clone(), agent);
    let mut out = Vec::new();
    let result = launcher.run_with_progress(target, &mut out);
    (result, String::from_utf8(out).unwrap())
}

#[test]
fn loads_once_and_detaches() {
    let provider = ScriptedProvider::new(Reply::new(0, "return code: 0\n"));
    let (result, progress) = run(&provider, native_agent(), "4242");

    result.expect("launch should succeed");
    let log = provider.log.borrow();
    assert_eq!(log.attaches, vec!["4242"]);
    assert_eq!(
        log.commands,
        vec![vec!["load", "/usr/local/scope/lib/libscope.so", "true", ""]]
    );
    assert_eq!(log.detaches, 1);

    let lines: Vec<&str> = progress.lines().collect();
    assert_eq!(
        lines,
        vec![
            "attaching to 4242",
            "attached to 4242 via scripted",
            "loading agent /usr/local/scope/lib/libscope.so",
            "detaching from 4242",
            "agent loaded into 4242",
        ]
    );
}

#[test]
fn identifier_is_passed_verbatim() {
    let provider = ScriptedProvider::new(Reply::new(0, "return code: 0\n"));
    let (result, _) = run(&provider, native_agent(), " com.example.Main ");
    result.unwrap();
    assert_eq!(provider.log.borrow().attaches, vec![" com.example.Main "]);
}

#[test]
fn options_reach_the_load_command() {
    let provider = ScriptedProvider::new(Reply::new(0, "return code: 0\n"));
    let agent = native_agent().with_options("verbose");
    let (result, _) = run(&provider, agent, "1");
    result.unwrap();
    assert_eq!(provider.log.borrow().commands[0][3], "verbose");
}

#[test]
fn missing_library_still_detaches() {
    let provider = ScriptedProvider::new(Reply::new(
        100,
        "/missing/libscope.so: cannot open shared object file\n",
    ));
    let agent = Agent::from_path("/missing/libscope.so").unwrap();
    let (result, progress) = run(&provider, agent, "4242");

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AgentLoadFailed);
    assert!(err.to_string().contains("cannot open shared object file"));
    assert_eq!(provider.log.borrow().detaches, 1);
    assert!(progress.contains("detaching from 4242"));
    assert!(!progress.contains("agent loaded"));
}

#[test]
fn failed_init_reports_return_code_and_detaches() {
    let provider = ScriptedProvider::new(Reply::new(0, "return code: 5\n"));
    let (result, _) = run(&provider, native_agent(), "4242");

    let err = result.unwrap_err();
    assert!(err.is_agent_load_failed());
    assert_eq!(err.agent_return_code(), Some(5));
    assert_eq!(provider.log.borrow().detaches, 1);
}

#[test]
fn failed_attach_skips_load_and_detach() {
    let mut provider = ScriptedProvider::new(Reply::new(0, "return code: 0\n"));
    provider.refuse_attach = true;
    let (result, progress) = run(&provider, native_agent(), "999999");

    assert!(result.unwrap_err().is_io());
    let log = provider.log.borrow();
    assert!(log.commands.is_empty());
    assert_eq!(log.detaches, 0);
    assert_eq!(progress, "attaching to 999999\n");
}

#[test]
fn detach_failure_is_reported_after_successful_load() {
    let mut provider = ScriptedProvider::new(Reply::new(0, "return code: 0\n"));
    provider.fail_detach = true;
    let (result, _) = run(&provider, native_agent(), "4242");

    let err = result.unwrap_err();
    assert!(err.is_io());
    assert_eq!(err.to_string(), "detach failed");
    assert_eq!(provider.log.borrow().detaches, 1);
}

#[test]
fn load_error_wins_over_detach_error() {
    let mut provider = ScriptedProvider::new(Reply::new(0, "return code: 1\n"));
    provider.fail_detach = true;
    let (result, _) = run(&provider, native_agent(), "4242");

    assert!(result.unwrap_err().is_agent_load_failed());
    assert_eq!(provider.log.borrow().detaches, 1);
}

#[test]
fn running_twice_loads_twice() {
    let provider = ScriptedProvider::new(Reply::new(0, "return code: 0\n"));
    run(&provider, native_agent(), "4242").0.unwrap();
    run(&provider, native_agent(), "4242").0.unwrap();

    let log = provider.log.borrow();
    assert_eq!(log.commands.len(), 2);
    assert_eq!(log.detaches, 2);
}

#[test]
fn jar_agents_go_through_instrument() {
    let provider = ScriptedProvider::new(Reply::new(0, "return code: 100\n"));
    let agent = Agent::from_jar("/opt/agent.jar").unwrap().with_options("debug");
    let (result, _) = run(&provider, agent, "4242");

    let err = result.unwrap_err();
    assert!(err.is_agent_load_failed());
    assert_eq!(
        err.to_string(),
        "agent JAR not found or no Agent-Class attribute"
    );
    assert_eq!(
        provider.log.borrow().commands,
        vec![vec!["load", "instrument", "false", "/opt/agent.jar=debug"]]
    );
}

#[test]
fn attach_descriptor_checks_provider() {
    let provider = ScriptedProvider::new(Reply::new(0, ""));
    let foreign = VirtualMachineDescriptor::new("other", "42", "Main");
    assert!(provider.attach_descriptor(&foreign).is_err());

    let own = provider.list().unwrap().remove(0);
    let vm = provider.attach_descriptor(&own).unwrap();
    assert_eq!(vm.id(), "42");
}
