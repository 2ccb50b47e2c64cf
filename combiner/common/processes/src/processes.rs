// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Context, Result};
use nix::sys::signal::Signal;
use signal_hook::{
    consts::signal::{SIGCHLD, SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    cell::RefCell,
    collections::VecDeque,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{Command, ExitCode, ExitStatus, Stdio},
};
use tracing::instrument;

// run runs a child process, with some special signal handling:
//   - Forwards SIGTERM to the child processes
//   - Ignores SIGINT while the processes is running. SIGINT is normally generated
//     by the terminal when Ctrl+C is pressed. The signal is sent to all processes
//     in the foreground processes group. This means that the child processes
//     should receive the signal by default so we don't need to forward it. One
//     exception is if the child puts itself into a different processes group, but
//     we want to avoid that.
#[instrument(skip_all, fields(command = %cmd.get_program().to_string_lossy()))]
pub fn run(cmd: &mut Command) -> Result<ExitStatus> {
    // Register the signal handler before spawning the process to ensure we don't drop any signals.
    let mut signals = Signals::new([SIGCHLD, SIGINT, SIGTERM])?;

    let mut child = cmd.spawn()?;

    for signal in signals.forever() {
        match signal {
            SIGCHLD => match &child.try_wait()? {
                Some(status) => return Ok(*status),
                None => continue,
            },
            SIGINT => {}
            SIGTERM => nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(child.id().try_into()?),
                Signal::SIGTERM,
            )?,
            _ => unreachable!(),
        }
    }
    unreachable!()
}

#[instrument(skip_all, fields(command = %cmd.get_program().to_string_lossy()))]
pub fn run_and_check(cmd: &mut Command) -> Result<()> {
    let status = run(cmd)?;
    if !status.success() {
        bail!("Command {cmd:?} failed with {status}");
    }

    Ok(())
}

/// Converts [`ExitStatus`] to [`ExitCode`] following the POSIX shell
/// convention.
///
/// It panics [`ExitStatus`] does not represent a status of an exiting process
/// (e.g. process being stopped or continued). This won't happen as long as you
/// get [`ExitStatus`] from [`std::process`] methods, such as
/// [`Command::status`], [`Command::output`],
/// [`Child::wait`](std::process::Child::wait).
pub fn status_to_exit_code(status: &ExitStatus) -> ExitCode {
    if let Some(code) = status.code() {
        ExitCode::from(code as u8)
    } else if let Some(signal) = status.signal() {
        ExitCode::from(128 + signal as u8)
    } else {
        panic!("ExitStatus does not represent process exit: {:?}", status);
    }
}

/// The outcome of a completed subprocess: its exit status and whatever the
/// runner captured of its streams. In visible mode the streams go to the
/// terminal and the captured fields are empty; the contract is otherwise
/// identical, so callers never need to know which mode is active.
#[derive(Debug)]
pub struct Execution {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Execution {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// A seam over subprocess execution.
///
/// All external tools (image builder, repository indexer, mount, chroot,
/// the header rewriter driver) are spawned through this trait so tests can
/// substitute [`ScriptedRunner`] and stay hermetic.
pub trait Runner: Send + Sync {
    /// Runs the command to completion and returns its outcome. A failure to
    /// *spawn* is an error; a non-zero exit is a normal [`Execution`].
    fn execute(&self, cmd: &mut Command) -> Result<Execution>;

    /// Runs the command and fails on non-zero exit, attaching the captured
    /// output to the error.
    fn execute_and_check(&self, cmd: &mut Command) -> Result<Execution> {
        let execution = self.execute(cmd)?;
        if !execution.success() {
            bail!(
                "Command {:?} failed with {}\n{}{}",
                cmd,
                execution.status,
                execution.stdout,
                execution.stderr
            );
        }
        Ok(execution)
    }

    /// Checks that `command --help` can be spawned and terminates without an
    /// OS-level load error. Used both for preflight checks of host tools and
    /// for probing emulator candidates inside a chroot.
    fn check_command(&self, command: &Path) -> bool {
        let mut cmd = Command::new(command);
        cmd.arg("--help");
        self.execute(&mut cmd).is_ok()
    }
}

/// Runs commands on the host.
///
/// In hidden mode (the default) both streams are captured and only surface
/// through the returned [`Execution`] or an error; in visible mode they are
/// inherited so the user watches the tool directly. Debug and verbose runs
/// switch to visible mode.
#[derive(Clone, Debug)]
pub struct HostRunner {
    visible: bool,
}

impl HostRunner {
    pub fn new(visible: bool) -> Self {
        Self { visible }
    }
}

impl Runner for HostRunner {
    fn execute(&self, cmd: &mut Command) -> Result<Execution> {
        let escaped: Vec<String> = std::iter::once(cmd.get_program())
            .chain(cmd.get_args())
            .map(|s| shell_escape::escape(s.to_string_lossy()).into_owned())
            .collect();
        tracing::info!("Running the command: {}", escaped.join(" "));

        if self.visible {
            let status = run(cmd)?;
            return Ok(Execution {
                status,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        cmd.stdin(Stdio::null());
        let output = cmd
            .output()
            .with_context(|| format!("Failed to spawn {:?}", cmd.get_program()))?;
        Ok(Execution {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A scripted response for a [`ScriptedRunner`] invocation.
#[derive(Clone, Debug)]
pub struct ScriptedResponse {
    pub exit_code: i32,
    pub stdout: String,
    /// Files to materialise when the invocation runs, as (path, contents).
    /// Lets tests emulate tools that produce artifacts (images, rebuilt
    /// packages) without running anything.
    pub files: Vec<(PathBuf, String)>,
}

impl ScriptedResponse {
    pub fn ok() -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            files: Vec::new(),
        }
    }

    pub fn failure(exit_code: i32) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            files: Vec::new(),
        }
    }
}

/// A [`Runner`] for tests: records every invoked command line and replays
/// scripted responses.
///
/// A response is registered against a substring of the expected command
/// line; the first queued response whose needle matches is consumed.
/// Commands with no matching response succeed with empty output, so tests
/// only script the invocations they care about.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: std::sync::Mutex<RefCell<VecDeque<(String, ScriptedResponse)>>>,
    invocations: std::sync::Mutex<RefCell<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next command whose line contains `needle`.
    pub fn respond_to(&self, needle: &str, response: ScriptedResponse) {
        self.responses
            .lock()
            .unwrap()
            .borrow_mut()
            .push_back((needle.to_string(), response));
    }

    /// All commands executed so far, one shell-ish line per invocation.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().borrow().clone()
    }

    /// Number of invocations whose command line contains `needle`.
    pub fn count_invocations_containing(&self, needle: &str) -> usize {
        self.invocations()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }
}

impl Runner for ScriptedRunner {
    fn execute(&self, cmd: &mut Command) -> Result<Execution> {
        let line: Vec<String> = std::iter::once(cmd.get_program())
            .chain(cmd.get_args())
            .map(|s| s.to_string_lossy().into_owned())
            .collect();
        let line = line.join(" ");
        self.invocations
            .lock()
            .unwrap()
            .borrow_mut()
            .push(line.clone());

        let response = {
            let responses = self.responses.lock().unwrap();
            let mut responses = responses.borrow_mut();
            let matched = responses
                .iter()
                .position(|(needle, _)| line.contains(needle));
            match matched {
                Some(index) => responses.remove(index).unwrap().1,
                None => ScriptedResponse::ok(),
            }
        };
        for (path, contents) in &response.files {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)?;
        }
        Ok(Execution {
            status: ExitStatus::from_raw(response.exit_code << 8),
            stdout: response.stdout,
            stderr: String::new(),
        })
    }

    fn check_command(&self, command: &Path) -> bool {
        let mut cmd = Command::new(command);
        cmd.arg("--help");
        self.execute(&mut cmd).map(|e| e.success()).unwrap_or(false)
    }
}
