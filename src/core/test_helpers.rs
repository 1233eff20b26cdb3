//! Shared test utilities for core module tests
//!
//! Provides a scripted [`FakeRunner`] so that no test ever spawns the real
//! rule engine. This module is only compiled in test mode.

use crate::core::executor::CommandRunner;
use crate::core::translate::Argv;
use std::cell::RefCell;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Output};
use std::rc::Rc;
use std::sync::Mutex;

/// Mutex for tests that need exclusive access to environment variables.
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("NFTKEEPER_ENGINE", "/opt/nft");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("NFTKEEPER_ENGINE");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// Splits a command line on whitespace into an argv.
pub fn argv(line: &str) -> Argv {
    line.split_whitespace().map(String::from).collect()
}

type Hook = Box<dyn Fn(&[String])>;

#[derive(Default)]
struct FakeState {
    calls: RefCell<Vec<Argv>>,
    failures: RefCell<Vec<String>>,
    spawn_errors: RefCell<Vec<String>>,
    signals: RefCell<Vec<(String, i32)>>,
    stdout: RefCell<Vec<(String, Vec<u8>)>>,
    hook: RefCell<Option<Hook>>,
}

/// Scripted command runner that records every invocation.
///
/// Commands succeed with empty output unless a rule below matches the
/// space-joined command line. Clones share state, so a test can keep one
/// handle while the executor owns another.
#[derive(Clone, Default)]
pub struct FakeRunner {
    state: Rc<FakeState>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `pattern` exit with status 1.
    pub fn fail_when(&self, pattern: &str) {
        self.state.failures.borrow_mut().push(pattern.to_string());
    }

    /// Commands containing `pattern` cannot be spawned.
    pub fn spawn_error_when(&self, pattern: &str) {
        self.state.spawn_errors.borrow_mut().push(pattern.to_string());
    }

    /// Commands containing `pattern` are killed by `signal`.
    pub fn signal_when(&self, pattern: &str, signal: i32) {
        self.state
            .signals
            .borrow_mut()
            .push((pattern.to_string(), signal));
    }

    /// The exact command line `command` prints `stdout`.
    pub fn stdout_for(&self, command: &str, stdout: &[u8]) {
        self.state
            .stdout
            .borrow_mut()
            .push((command.to_string(), stdout.to_vec()));
    }

    /// Runs `hook` after recording each call, before the outcome is decided.
    pub fn on_call(&self, hook: impl Fn(&[String]) + 'static) {
        *self.state.hook.borrow_mut() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<Argv> {
        self.state.calls.borrow().clone()
    }

    /// Recorded calls as space-joined strings.
    pub fn call_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.join(" ")).collect()
    }
}

impl CommandRunner for FakeRunner {
    async fn output(&self, argv: &[String]) -> io::Result<Output> {
        let line = argv.join(" ");
        self.state.calls.borrow_mut().push(argv.to_vec());
        if let Some(hook) = self.state.hook.borrow().as_ref() {
            hook(argv);
        }

        if self
            .state
            .spawn_errors
            .borrow()
            .iter()
            .any(|p| line.contains(p.as_str()))
        {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory",
            ));
        }

        let signal = self
            .state
            .signals
            .borrow()
            .iter()
            .find(|(p, _)| line.contains(p.as_str()))
            .map(|(_, sig)| *sig);
        if let Some(sig) = signal {
            return Ok(Output {
                status: ExitStatus::from_raw(sig),
                stdout: Vec::new(),
                stderr: Vec::new(),
            });
        }

        if self
            .state
            .failures
            .borrow()
            .iter()
            .any(|p| line.contains(p.as_str()))
        {
            return Ok(Output {
                status: ExitStatus::from_raw(1 << 8),
                stdout: Vec::new(),
                stderr: b"Error: Could not process rule: No such file or directory\n".to_vec(),
            });
        }

        let stdout = self
            .state
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

/// In-memory dry-run sink that can be inspected after the executor owns it.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
