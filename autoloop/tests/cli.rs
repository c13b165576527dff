//! CLI tests for `autoloop`.
//!
//! Spawns the binary against a temp project and checks exit codes and the
//! files each command leaves behind.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use autoloop::exit_codes;
use autoloop::io::ideas::IdeaQueue;
use autoloop::io::init::ProjectPaths;
use autoloop::io::state_store::StateStore;

fn autoloop(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autoloop"))
        .current_dir(root)
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("CODEX_BIN")
        .env_remove("CLAUDE_BIN")
        .env_remove("ENGINE")
        .output()
        .expect("spawn autoloop")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn init_then_reinit_requires_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let first = autoloop(temp.path(), &["init"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    assert!(temp.path().join("autoloop.toml").is_file());
    assert!(temp.path().join("PROMPT.md").is_file());

    let second = autoloop(temp.path(), &["init"]);
    assert_eq!(second.status.code(), Some(exit_codes::INVALID));

    let forced = autoloop(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn idea_commands_maintain_priority_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    autoloop(temp.path(), &["init"]);

    let submit = |text: &str, priority: &str| {
        let output = autoloop(temp.path(), &["idea", "submit", text, "--priority", priority]);
        assert_eq!(output.status.code(), Some(exit_codes::OK));
        stdout(&output).trim().to_string()
    };
    let first = submit("newsletter", "5");
    let second = submit("affiliate program", "8");
    let third = submit("podcast", "5");

    let list = stdout(&autoloop(temp.path(), &["idea", "list"]));
    let ids: Vec<&str> = list
        .lines()
        .filter_map(|line| line.split('\t').next())
        .collect();
    assert_eq!(ids, vec![second.as_str(), first.as_str(), third.as_str()]);

    let output = autoloop(temp.path(), &["idea", "priority", &first, "99"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let output = autoloop(temp.path(), &["idea", "reject", &second]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let queue = IdeaQueue::new(&ProjectPaths::new(temp.path()));
    let order: Vec<(String, u8)> = queue
        .list()
        .expect("list")
        .into_iter()
        .map(|entry| (entry.id, entry.priority))
        .collect();
    assert_eq!(order, vec![(first, 10), (third, 5)]);
}

#[test]
fn idea_errors_have_distinct_exit_codes() {
    let temp = tempfile::tempdir().expect("tempdir");
    autoloop(temp.path(), &["init"]);

    let missing = autoloop(temp.path(), &["idea", "approve", "0000000000001"]);
    assert_eq!(missing.status.code(), Some(exit_codes::NOT_FOUND));

    let id = stdout(&autoloop(temp.path(), &["idea", "submit", "mobile app"]))
        .trim()
        .to_string();
    let approved = autoloop(temp.path(), &["idea", "approve", &id]);
    assert_eq!(approved.status.code(), Some(exit_codes::OK));
    assert_eq!(
        fs::read_to_string(temp.path().join(".auto-company-idea")).expect("current idea"),
        "mobile app"
    );
    assert_eq!(
        fs::read_to_string(temp.path().join(".auto-company-start")).expect("trigger"),
        id
    );

    let again = autoloop(temp.path(), &["idea", "reject", &id]);
    assert_eq!(again.status.code(), Some(exit_codes::NOT_PENDING));
}

#[test]
fn control_commands_write_marker_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    autoloop(temp.path(), &["init"]);

    autoloop(temp.path(), &["pause"]);
    assert!(temp.path().join(".auto-company-paused").exists());
    autoloop(temp.path(), &["resume"]);
    assert!(!temp.path().join(".auto-company-paused").exists());

    autoloop(temp.path(), &["start"]);
    assert_eq!(
        fs::read_to_string(temp.path().join(".auto-company-start")).expect("trigger"),
        "manual"
    );
    autoloop(temp.path(), &["stop"]);
    assert!(temp.path().join(".auto-company-stop").exists());

    let status = autoloop(temp.path(), &["status"]);
    assert_eq!(status.status.code(), Some(exit_codes::OK));
    let report: serde_json::Value =
        serde_json::from_slice(&status.stdout).expect("status is json");
    assert_eq!(report["paused"], false);
    assert_eq!(report["pendingStart"], "manual");
}

#[test]
fn run_without_engine_exits_with_engine_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    autoloop(temp.path(), &["init"]);
    let empty_path = tempfile::tempdir().expect("empty path dir");

    let output = Command::new(env!("CARGO_BIN_EXE_autoloop"))
        .current_dir(temp.path())
        .args(["run", "--once"])
        .env("PATH", empty_path.path())
        .env_remove("CODEX_BIN")
        .env_remove("CLAUDE_BIN")
        .env_remove("ENGINE")
        .output()
        .expect("spawn autoloop");

    assert_eq!(output.status.code(), Some(exit_codes::ENGINE_NOT_FOUND));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("codex not found"), "{stderr}");
    assert!(!temp.path().join(".auto-company-state.json").exists());
}

/// Writes an executable stand-in for `codex` that honours `-o` and prints enough to pass validation.
#[cfg(unix)]
fn fake_engine(dir: &Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let engine = dir.join("fake-codex");
    fs::write(
        &engine,
        "#!/bin/sh\n\
         while [ $# -gt 0 ]; do\n\
           if [ \"$1\" = \"-o\" ]; then shift; printf 'final words' > \"$1\"; fi\n\
           shift\n\
         done\n\
         echo 'did some real work this cycle'\n",
    )
    .expect("write engine");
    let mut perms = fs::metadata(&engine).expect("meta").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&engine, perms).expect("chmod");
    engine
}

#[cfg(unix)]
#[test]
fn run_once_invokes_engine_and_records_cycle() {
    let temp = tempfile::tempdir().expect("tempdir");
    autoloop(temp.path(), &["init"]);
    fs::write(temp.path().join("PROMPT.md"), "Build the product.\n").expect("prompt");
    let engine = fake_engine(temp.path());

    let output = Command::new(env!("CARGO_BIN_EXE_autoloop"))
        .current_dir(temp.path())
        .args(["run", "--once"])
        .env("CODEX_BIN", &engine)
        .env_remove("ENGINE")
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn autoloop");
    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let paths = ProjectPaths::new(temp.path());
    let state = StateStore::new(&paths.state_path)
        .load()
        .expect("load")
        .expect("snapshot");
    assert_eq!(state.loop_count, 1);
    assert_eq!(state.consecutive_errors, 0);

    let logs = stdout(&autoloop(temp.path(), &["logs"]));
    let name = logs
        .lines()
        .next()
        .and_then(|line| line.split('\t').next())
        .expect("one log")
        .to_string();
    assert!(name.starts_with("cycle-0001-"));
    let shown = stdout(&autoloop(temp.path(), &["logs", "--show", &name]));
    assert!(shown.contains("did some real work this cycle"));
    assert!(shown.contains("final words"));

    let operator_log = stdout(&autoloop(temp.path(), &["logs", "--main", "-n", "200"]));
    assert!(operator_log.contains("cycle succeeded"), "{operator_log}");
    assert!(!operator_log.contains("\u{1b}["), "operator log has no ANSI colors");
}

/// A running loop refuses a second `run`, and SIGTERM ends it with a `stopped` snapshot.
#[cfg(unix)]
#[test]
fn sigterm_stops_loop_and_lock_rejects_second_run() {
    use std::process::Stdio;
    use std::thread;
    use std::time::{Duration, Instant};

    use autoloop::core::types::CycleStatus;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    use wait_timeout::ChildExt;

    let temp = tempfile::tempdir().expect("tempdir");
    autoloop(temp.path(), &["init"]);
    fs::write(temp.path().join("PROMPT.md"), "Build the product.\n").expect("prompt");
    let engine = fake_engine(temp.path());

    let mut child = Command::new(env!("CARGO_BIN_EXE_autoloop"))
        .current_dir(temp.path())
        .arg("run")
        .env("CODEX_BIN", &engine)
        .env("INTERVAL", "60")
        .env_remove("ENGINE")
        .env_remove("RUST_LOG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn loop");

    let paths = ProjectPaths::new(temp.path());
    let deadline = Instant::now() + Duration::from_secs(20);
    let first_cycle_done = || {
        StateStore::new(&paths.state_path)
            .load()
            .ok()
            .flatten()
            .is_some_and(|state| state.loop_count == 1 && state.status == CycleStatus::Running)
            && fs::read_dir(&paths.logs_dir).is_ok_and(|entries| {
                entries
                    .filter_map(Result::ok)
                    .any(|entry| entry.file_name().to_string_lossy().starts_with("cycle-0001-"))
            })
    };
    while !first_cycle_done() {
        assert!(Instant::now() < deadline, "first cycle never finished");
        thread::sleep(Duration::from_millis(50));
    }

    let second = Command::new(env!("CARGO_BIN_EXE_autoloop"))
        .current_dir(temp.path())
        .args(["run", "--once"])
        .env("CODEX_BIN", &engine)
        .env_remove("ENGINE")
        .output()
        .expect("spawn second loop");
    assert_eq!(second.status.code(), Some(exit_codes::ALREADY_RUNNING));
    assert!(String::from_utf8_lossy(&second.stderr).contains("already running"));

    let pid = i32::try_from(child.id()).expect("pid fits");
    kill(Pid::from_raw(pid), Signal::SIGTERM).expect("send SIGTERM");
    let status = child
        .wait_timeout(Duration::from_secs(10))
        .expect("wait")
        .expect("loop exits after SIGTERM");
    assert_eq!(status.code(), Some(exit_codes::OK));

    let state = StateStore::new(&paths.state_path)
        .load()
        .expect("load")
        .expect("snapshot");
    assert_eq!(state.status, CycleStatus::Stopped);
    assert_eq!(state.loop_count, 1);

    let again = autoloop(temp.path(), &["status"]);
    assert_eq!(again.status.code(), Some(exit_codes::OK));
}
