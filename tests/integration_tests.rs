//! Integration tests for nftkeeper
//!
//! These tests drive the full lifecycle (engine check, backup, apply loop,
//! restore) through the public API. Most use a scripted in-process runner;
//! one uses a mock `nft` shell script so real child processes are spawned
//! without needing root or nftables.
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(clippy::uninlined_format_args)]

use nftkeeper::config::DaemonSettings;
use nftkeeper::daemon::{self, DaemonContext, RunOptions, triggers::ReloadSignal};
use nftkeeper::{CommandRunner, Counters, Error, SystemRunner};
use std::cell::{Cell, RefCell};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::rc::Rc;
use std::time::Duration;

const SCENARIO: &str = "add rule A\n# comment\n\nadd rule B\n";
const DUMP: &[u8] = b"table inet filter {\n\tchain input {\n\t}\n}\n";

type Hook = Box<dyn Fn(&[String])>;

/// Scripted runner: records calls, fails on patterns, prints canned stdout.
#[derive(Clone, Default)]
struct ScriptedRunner {
    calls: Rc<RefCell<Vec<String>>>,
    failures: Rc<RefCell<Vec<String>>>,
    stdout: Rc<RefCell<Vec<(String, Vec<u8>)>>>,
    hook: Rc<RefCell<Option<Hook>>>,
}

impl ScriptedRunner {
    /// A runner whose engine is new enough and whose dump returns [`DUMP`].
    fn healthy() -> Self {
        let runner = Self::default();
        runner.stdout_for("nft --version", b"nftables v1.0.6 (Lester Gooch #5)\n");
        runner.stdout_for("nft list ruleset", DUMP);
        runner
    }

    fn fail_when(&self, pattern: &str) {
        self.failures.borrow_mut().push(pattern.to_string());
    }

    fn stdout_for(&self, command: &str, stdout: &[u8]) {
        self.stdout
            .borrow_mut()
            .retain(|(cmd, _)| cmd != command);
        self.stdout
            .borrow_mut()
            .push((command.to_string(), stdout.to_vec()));
    }

    fn on_call(&self, hook: impl Fn(&[String]) + 'static) {
        *self.hook.borrow_mut() = Some(Box::new(hook));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn rule_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("nft add"))
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    async fn output(&self, argv: &[String]) -> io::Result<Output> {
        let line = argv.join(" ");
        self.calls.borrow_mut().push(line.clone());
        if let Some(hook) = self.hook.borrow().as_ref() {
            hook(argv);
        }

        if self.failures.borrow().iter().any(|p| line.contains(p.as_str())) {
            return Ok(Output {
                status: ExitStatus::from_raw(1 << 8),
                stdout: Vec::new(),
                stderr: b"Error: Could not process rule: No such file or directory\n".to_vec(),
            });
        }

        let stdout = self
            .stdout
            .borrow()
            .iter()
            .find(|(cmd, _)| *cmd == line)
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(Output {
            status: ExitStatus::from_raw(0),
            stdout,
            stderr: Vec::new(),
        })
    }
}

/// Settings that keep every state file inside `dir`.
fn settings(dir: &Path) -> DaemonSettings {
    DaemonSettings {
        snapshot_path: dir.join("state").join("ruleset.backup"),
        metrics_path: dir.join("state").join("metrics.prom"),
        pid_file: dir.join("run").join("nftkeeper.pid"),
        audit_log_path: Some(dir.join("state").join("audit.log")),
        poll_interval_ms: 10,
        ..DaemonSettings::default()
    }
}

fn write_config(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("config.conf");
    std::fs::write(&path, contents).unwrap();
    path
}

fn options(config_path: PathBuf, once: bool) -> RunOptions {
    RunOptions {
        config_path,
        once,
        ..RunOptions::default()
    }
}

/// Runs the daemon with a generous timeout so a missed trigger fails instead of hanging.
async fn run_to_end<R: CommandRunner>(
    ctx: &mut DaemonContext<R>,
    signal: &ReloadSignal,
) -> nftkeeper::Result<nftkeeper::RunSummary> {
    tokio::time::timeout(Duration::from_secs(10), daemon::run(ctx, signal))
        .await
        .expect("daemon did not stop")
}

#[tokio::test]
async fn test_failed_line_still_runs_rest_and_sets_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), SCENARIO);
    let runner = ScriptedRunner::healthy();
    runner.fail_when("rule A");
    let mut ctx = DaemonContext::new(settings(dir.path()), options(config, true), runner.clone());

    let summary = run_to_end(&mut ctx, &ReloadSignal::new()).await.unwrap();

    assert_eq!(runner.rule_calls(), vec!["nft add rule A", "nft add rule B"]);
    // rule B and the snapshot load succeed, rule A fails
    assert_eq!(
        summary.counters,
        Counters {
            applied: 2,
            failed: 1
        }
    );
    assert_eq!(summary.exit_code(), 1);
}

#[tokio::test]
async fn test_clean_run_exits_zero_and_restores_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), SCENARIO);
    let runner = ScriptedRunner::healthy();
    let set = settings(dir.path());
    let snapshot = set.snapshot_path.clone();
    let mut ctx = DaemonContext::new(set, options(config, true), runner.clone());

    let summary = run_to_end(&mut ctx, &ReloadSignal::new()).await.unwrap();

    assert_eq!(summary.exit_code(), 0);
    assert_eq!(std::fs::read(&snapshot).unwrap(), DUMP);
    assert_eq!(
        runner.calls(),
        vec![
            "nft --version".to_string(),
            "nft list ruleset".to_string(),
            "nft flush ruleset".to_string(),
            "nft add rule A".to_string(),
            "nft add rule B".to_string(),
            "nft flush ruleset".to_string(),
            format!("nft -f {}", snapshot.display()),
        ]
    );
}

#[tokio::test]
async fn test_dry_run_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), SCENARIO);
    let runner = ScriptedRunner::healthy();
    let set = settings(dir.path());
    let snapshot = set.snapshot_path.clone();
    let mut opts = options(config, true);
    opts.dry_run = true;
    opts.update = true;
    let mut ctx = DaemonContext::new(set, opts, runner.clone()).with_dry_run_sink(Box::new(io::sink()));

    let summary = run_to_end(&mut ctx, &ReloadSignal::new()).await.unwrap();

    assert!(runner.calls().is_empty());
    assert_eq!(summary.counters, Counters::default());
    assert_eq!(summary.exit_code(), 0);
    assert!(!snapshot.exists());
}

#[tokio::test]
async fn test_restore_runs_once_even_when_backup_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), SCENARIO);
    let runner = ScriptedRunner::healthy();
    runner.fail_when("list ruleset");
    let set = settings(dir.path());
    let snapshot = set.snapshot_path.clone();
    let mut ctx = DaemonContext::new(set, options(config, true), runner.clone());

    let summary = run_to_end(&mut ctx, &ReloadSignal::new()).await.unwrap();

    assert!(!summary.backup_ok);
    assert!(summary.restore_ok);
    assert!(!snapshot.exists());

    let calls = runner.calls();
    let last_rule = calls.iter().rposition(|c| c.starts_with("nft add")).unwrap();
    // Only the restore flush follows the last rule; no load without a snapshot
    assert_eq!(&calls[last_rule + 1..], ["nft flush ruleset".to_string()]);
}

#[tokio::test]
async fn test_termination_mid_apply_skips_remaining_lines() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "add rule 1\nadd rule 2\nadd rule 3\nadd rule 4\n",
    );
    let runner = ScriptedRunner::healthy();
    let signal = ReloadSignal::new();
    let hook_signal = signal.clone();
    runner.on_call(move |argv| {
        if argv.join(" ") == "nft add rule 2" {
            hook_signal.request_terminate();
        }
    });
    let set = settings(dir.path());
    let snapshot = set.snapshot_path.clone();
    let mut ctx = DaemonContext::new(set, options(config, false), runner.clone());

    let summary = run_to_end(&mut ctx, &signal).await.unwrap();

    assert_eq!(summary.applies, 1);
    assert_eq!(runner.rule_calls(), vec!["nft add rule 1", "nft add rule 2"]);
    assert_eq!(
        runner.calls().last().unwrap(),
        &format!("nft -f {}", snapshot.display())
    );
}

#[tokio::test]
async fn test_reload_requests_during_apply_coalesce() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), SCENARIO);
    let runner = ScriptedRunner::healthy();
    let signal = ReloadSignal::new();
    let hook_signal = signal.clone();
    let b_seen = Rc::new(Cell::new(0));
    runner.on_call(move |argv| match argv.join(" ").as_str() {
        "nft add rule A" if b_seen.get() == 0 => {
            for _ in 0..5 {
                hook_signal.request_reload();
            }
        }
        "nft add rule B" => {
            b_seen.set(b_seen.get() + 1);
            if b_seen.get() == 2 {
                hook_signal.request_terminate();
            }
        }
        _ => {}
    });
    let mut ctx = DaemonContext::new(settings(dir.path()), options(config, false), runner.clone());

    let summary = run_to_end(&mut ctx, &signal).await.unwrap();

    assert_eq!(summary.applies, 2);
    assert_eq!(
        runner.rule_calls(),
        vec![
            "nft add rule A",
            "nft add rule B",
            "nft add rule A",
            "nft add rule B"
        ]
    );
}

#[tokio::test]
async fn test_file_save_and_signal_during_apply_fold_into_one_reapply() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), SCENARIO);
    let runner = ScriptedRunner::healthy();
    let signal = ReloadSignal::new();
    let hook_signal = signal.clone();
    let hook_config = config.clone();
    let first_pass = Rc::new(Cell::new(true));
    runner.on_call(move |argv| match argv.join(" ").as_str() {
        "nft add rule A" if first_pass.get() => {
            std::fs::write(&hook_config, SCENARIO).unwrap();
            hook_signal.request_reload();
        }
        "nft add rule B" if first_pass.get() => {
            first_pass.set(false);
            // Give the watcher thread time to queue the write before the pass ends
            std::thread::sleep(Duration::from_millis(200));
        }
        _ => {}
    });
    let mut ctx = DaemonContext::new(settings(dir.path()), options(config, false), runner.clone());
    let stopper = signal.clone();

    let (summary, ()) = tokio::join!(run_to_end(&mut ctx, &signal), async move {
        tokio::time::sleep(Duration::from_millis(600)).await;
        stopper.request_terminate();
    });
    let summary = summary.unwrap();

    assert_eq!(summary.applies, 2);
    assert_eq!(
        runner.rule_calls(),
        vec![
            "nft add rule A",
            "nft add rule B",
            "nft add rule A",
            "nft add rule B"
        ]
    );
}

#[tokio::test]
async fn test_config_rewrite_triggers_reapply() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "add rule A\n");
    let runner = ScriptedRunner::healthy();
    let signal = ReloadSignal::new();
    let hook_signal = signal.clone();
    let hook_config = config.clone();
    runner.on_call(move |argv| match argv.join(" ").as_str() {
        "nft add rule A" => {
            // Editor-style save: write a sibling, rename it over the config
            let staged = hook_config.with_extension("tmp");
            std::fs::write(&staged, "add rule C\n").unwrap();
            std::fs::rename(&staged, &hook_config).unwrap();
        }
        "nft add rule C" => hook_signal.request_terminate(),
        _ => {}
    });
    let mut ctx = DaemonContext::new(settings(dir.path()), options(config, false), runner.clone());

    let summary = run_to_end(&mut ctx, &signal).await.unwrap();

    assert_eq!(summary.applies, 2);
    assert_eq!(runner.rule_calls(), vec!["nft add rule A", "nft add rule C"]);
}

#[tokio::test]
async fn test_unreadable_config_on_reload_keeps_live_rules() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), SCENARIO);
    let runner = ScriptedRunner::healthy();
    let signal = ReloadSignal::new();
    let hook_signal = signal.clone();
    let hook_config = config.clone();
    runner.on_call(move |argv| {
        if argv.join(" ") == "nft add rule B" {
            std::fs::remove_file(&hook_config).unwrap();
            hook_signal.request_reload();
        }
    });
    let set = settings(dir.path());
    let snapshot = set.snapshot_path.clone();
    let mut ctx = DaemonContext::new(set, options(config, false), runner.clone());

    // Terminate once the failed reload has been handled
    let terminator = signal.clone();
    let run = run_to_end(&mut ctx, &signal);
    let stop = async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        terminator.request_terminate();
    };
    let (summary, ()) = tokio::join!(run, stop);
    let summary = summary.unwrap();

    assert_eq!(summary.applies, 1);
    let flushes = runner
        .calls()
        .iter()
        .filter(|c| *c == "nft flush ruleset")
        .count();
    // Initial apply and restore only; the failed reload flushed nothing
    assert_eq!(flushes, 2);
    assert_eq!(
        runner.calls().last().unwrap(),
        &format!("nft -f {}", snapshot.display())
    );
}

#[tokio::test]
async fn test_old_engine_aborts_before_backup() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), SCENARIO);
    let runner = ScriptedRunner::healthy();
    runner.stdout_for("nft --version", b"nftables v0.8.3 (Topsy)\n");
    let set = settings(dir.path());
    let snapshot = set.snapshot_path.clone();
    let mut ctx = DaemonContext::new(set, options(config, true), runner.clone());

    let result = run_to_end(&mut ctx, &ReloadSignal::new()).await;

    assert!(matches!(result, Err(Error::EngineVersion { .. })));
    assert_eq!(runner.calls(), vec!["nft --version"]);
    assert!(!snapshot.exists());
}

#[tokio::test]
async fn test_missing_config_is_fatal_before_backup() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::healthy();
    let set = settings(dir.path());
    let snapshot = set.snapshot_path.clone();
    let mut ctx = DaemonContext::new(
        set,
        options(dir.path().join("absent.conf"), true),
        runner.clone(),
    );

    let result = run_to_end(&mut ctx, &ReloadSignal::new()).await;

    assert!(matches!(result, Err(Error::Config { .. })));
    assert_eq!(runner.calls(), vec!["nft --version"]);
    assert!(!snapshot.exists());
}

#[tokio::test]
async fn test_status_dumps_without_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::healthy();
    let set = settings(dir.path());
    let snapshot = set.snapshot_path.clone();
    let mut ctx = DaemonContext::new(
        set,
        options(dir.path().join("config.conf"), false),
        runner.clone(),
    );

    let mut out = Vec::new();
    ctx.status(&mut out).await.unwrap();

    assert_eq!(out, DUMP);
    assert_eq!(runner.calls(), vec!["nft list ruleset"]);
    assert!(!snapshot.exists());
}

#[tokio::test]
async fn test_applying_same_config_twice_is_identical() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), SCENARIO);

    let mut runs = Vec::new();
    for _ in 0..2 {
        let runner = ScriptedRunner::healthy();
        let mut ctx = DaemonContext::new(
            settings(dir.path()),
            options(config.clone(), true),
            runner.clone(),
        );
        let summary = run_to_end(&mut ctx, &ReloadSignal::new()).await.unwrap();
        runs.push((runner.calls(), summary.counters));
    }

    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn test_package_update_runs_before_backup() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "add rule A\n");
    let runner = ScriptedRunner::healthy();
    let mut opts = options(config, true);
    opts.update = true;
    let mut ctx = DaemonContext::new(settings(dir.path()), opts, runner.clone());

    let summary = run_to_end(&mut ctx, &ReloadSignal::new()).await.unwrap();

    let calls = runner.calls();
    assert_eq!(
        &calls[..4],
        [
            "nft --version",
            "apt-get update -y",
            "apt-get upgrade -y",
            "nft list ruleset"
        ]
    );
    // Package commands are not counted
    assert_eq!(
        summary.counters,
        Counters {
            applied: 2,
            failed: 0
        }
    );
}

#[tokio::test]
async fn test_startup_apply_reads_config_after_package_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "add rule OLD\n");
    let runner = ScriptedRunner::healthy();
    let hook_config = config.clone();
    runner.on_call(move |argv| {
        if argv.join(" ") == "apt-get upgrade -y" {
            std::fs::write(&hook_config, "add rule NEW\n").unwrap();
        }
    });
    let mut opts = options(config, true);
    opts.update = true;
    let mut ctx = DaemonContext::new(settings(dir.path()), opts, runner.clone());

    let summary = run_to_end(&mut ctx, &ReloadSignal::new()).await.unwrap();

    assert_eq!(summary.applies, 1);
    assert_eq!(runner.rule_calls(), vec!["nft add rule NEW"]);
}

/// Writes an executable stand-in for `nft` that logs its arguments.
fn write_mock_nft(dir: &Path, log: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = format!(
        r#"#!/bin/sh
echo "$*" >> "{log}"
case "$*" in
    --version) echo "nftables v1.0.6 (Lester Gooch #5)" ;;
    "list ruleset") printf 'table inet filter {{\n}}\n' ;;
    *fail*) echo "Error: Could not process rule: No such file or directory" >&2; exit 1 ;;
esac
exit 0
"#,
        log = log.display()
    );
    let path = dir.join("nft");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn test_system_runner_with_mock_nft() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("nft.log");
    let nft = write_mock_nft(dir.path(), &log);
    let config = write_config(
        dir.path(),
        "add rule inet filter input tcp dport 22 accept\nadd rule fail\n",
    );

    let mut set = settings(dir.path());
    set.engine = nft.display().to_string();
    let snapshot = set.snapshot_path.clone();
    let mut ctx = DaemonContext::new(set, options(config, true), SystemRunner);

    let summary = run_to_end(&mut ctx, &ReloadSignal::new()).await.unwrap();

    assert_eq!(
        summary.counters,
        Counters {
            applied: 2,
            failed: 1
        }
    );
    assert_eq!(
        std::fs::read_to_string(&snapshot).unwrap(),
        "table inet filter {\n}\n"
    );
    let logged = std::fs::read_to_string(&log).unwrap();
    assert_eq!(
        logged.lines().collect::<Vec<_>>(),
        vec![
            "--version".to_string(),
            "list ruleset".to_string(),
            "flush ruleset".to_string(),
            "add rule inet filter input tcp dport 22 accept".to_string(),
            "add rule fail".to_string(),
            "flush ruleset".to_string(),
            format!("-f {}", snapshot.display()),
        ]
    );
}
