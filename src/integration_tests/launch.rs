//! Launch the test programs inside the sandbox.

use std::time::Duration;

use super::util;
use crate::args::ArgumentBuilder;
use crate::config::ContainerConfig;
use crate::launcher::{LaunchOptions, ProcessLauncher};
use crate::sandbox::{FileAccess, SandboxProfile};

const TIMEOUT: Duration = Duration::from_secs(30);

fn test_container() -> ContainerConfig {
    ContainerConfig {
        name: "SandboxBroker.IntegrationTest".to_string(),
        display_name: "Sandbox Broker Integration Test".to_string(),
        description: "Container used by the integration tests".to_string(),
    }
}

/// Find the program, and let the container read and run it.
fn prepared_exec(container: &ContainerConfig, name: &str) -> std::path::PathBuf {
    let exe = util::find_exec(name);
    let profile = SandboxProfile::get_or_create(&container.name, &container.display_name, &container.description)
        .unwrap();
    profile
        .grant_file_access(exe.parent().unwrap(), FileAccess::READ_EXECUTE)
        .unwrap();
    exe
}

/// Plain arguments telling check-args which key and pairs to expect.
fn expectation(key: u32, args: &ArgumentBuilder) -> Vec<String> {
    let mut ret = vec![format!("{key:#010x}")];
    ret.extend(args.arguments().iter().map(|(k, v)| format!("{k}={v}")));
    ret
}

fn launch_check_args(args: &ArgumentBuilder, key: u32) -> Option<u32> {
    let container = test_container();
    let exe = prepared_exec(&container, "check-args");
    let launcher = ProcessLauncher::new(container);
    let options = LaunchOptions { extra_args: expectation(key, args), ..LaunchOptions::default() };
    let process = launcher.launch_with(&exe, args, key, &options).unwrap();
    assert!(process.pid() > 0);
    process.wait(Some(TIMEOUT)).unwrap()
}

/// The program decodes its envelope back to the arguments that were sent.
#[test]
fn check_args_decodes_envelope() {
    let args = ArgumentBuilder::new()
        .append("DEV.TestSID", "abc123")
        .append("SYS.Region", "3")
        .append("language", "1");
    assert_eq!(launch_check_args(&args, 0x1234_0000), Some(0));
}

/// Spaces, quotes and non-ASCII text survive quoting and the envelope.
#[test]
fn check_args_decodes_awkward_values() {
    let args = ArgumentBuilder::new()
        .append("DEV.GamePath", r"C:\Program Files\Game\")
        .append("quote", "say \"hi\"")
        .append("unicode", "ファイナル ファンタジー")
        .append("empty", "");
    assert_eq!(launch_check_args(&args, 0xABCD_0000), Some(0));
}

/// A different key in the expectation makes decoding fail in the child.
#[test]
fn check_args_rejects_wrong_key() {
    let container = test_container();
    let exe = prepared_exec(&container, "check-args");
    let launcher = ProcessLauncher::new(container);
    let args = ArgumentBuilder::new().append("DEV.TestSID", "abc123");
    let options = LaunchOptions { extra_args: expectation(0x0002_0000, &args), ..LaunchOptions::default() };
    let process = launcher.launch_with(&exe, &args, 0x0001_0000, &options).unwrap();
    assert_ne!(process.wait(Some(TIMEOUT)).unwrap(), Some(0));
}

/// A suspended process does not run until resumed.
#[test]
fn suspended_launch_waits_for_resume() {
    let container = test_container();
    let exe = prepared_exec(&container, "check-args");
    let launcher = ProcessLauncher::new(container);
    let args = ArgumentBuilder::new();
    let options = LaunchOptions {
        suspended: true,
        extra_args: expectation(0x0001_0000, &args),
        ..LaunchOptions::default()
    };

    let process = launcher.launch_with(&exe, &args, 0x0001_0000, &options).unwrap();
    assert_eq!(process.wait(Some(Duration::from_millis(200))).unwrap(), None);
    assert_eq!(process.exit_code().unwrap(), None);

    process.resume().unwrap();
    assert_eq!(process.wait(Some(TIMEOUT)).unwrap(), Some(0));
}

#[test]
fn terminate_sets_exit_code() {
    let container = test_container();
    let exe = prepared_exec(&container, "check-args");
    let launcher = ProcessLauncher::new(container);
    let options = LaunchOptions { suspended: true, ..LaunchOptions::default() };

    let process = launcher
        .launch_with(&exe, &ArgumentBuilder::new(), 0, &options)
        .unwrap();
    process.terminate(7).unwrap();
    assert_eq!(process.wait(Some(TIMEOUT)).unwrap(), Some(7));
}
