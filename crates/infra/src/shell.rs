//! External command execution
//!
//! Everything that shells out goes through [`CommandRunner`] so probes and
//! transports can be driven by a scripted runner in tests.

use std::io;
use std::path::Path;
use std::process::Command;
use tracing::{debug, trace};

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// stdout then stderr, split into lines
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .chain(self.stderr.lines())
            .map(str::to_string)
            .collect()
    }

    /// Short failure description for error messages
    pub fn failure_reason(&self) -> String {
        let detail = self.stderr.trim();
        match (self.code, detail.is_empty()) {
            (Some(code), true) => format!("exit status {}", code),
            (Some(code), false) => format!("exit status {}: {}", code, detail),
            (None, _) => "terminated by signal".to_string(),
        }
    }
}

/// Render a command line for logs and errors
pub fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

pub const REDACTED: &str = "<redacted>";

/// [`command_line`] with every argument equal to `secret` masked
pub fn redacted_line(program: &str, args: &[&str], secret: &str) -> String {
    let masked: Vec<&str> = args
        .iter()
        .map(|arg| if !secret.is_empty() && *arg == secret { REDACTED } else { *arg })
        .collect();
    command_line(program, &masked)
}

/// Runs external programs
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, optionally in `cwd`, and capture its output
    ///
    /// A non-zero exit is reported through [`CommandOutput::success`]; only a
    /// failure to start the program is an `Err`.
    fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> io::Result<CommandOutput>;

    /// Same as [`run`](Self::run); runners that log must mask `secret`
    fn run_secret(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&Path>,
        _secret: &str,
    ) -> io::Result<CommandOutput> {
        self.run(program, args, cwd)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> io::Result<CommandOutput> {
        (**self).run(program, args, cwd)
    }

    fn run_secret(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&Path>,
        secret: &str,
    ) -> io::Result<CommandOutput> {
        (**self).run_secret(program, args, cwd, secret)
    }
}

/// Runs commands on the local system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn execute(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&Path>,
        shown: &str,
    ) -> io::Result<CommandOutput> {
        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        trace!(command = %shown, "Running command");
        let output = command.output()?;
        let result = CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %shown, success = result.success, "Command finished");
        Ok(result)
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> io::Result<CommandOutput> {
        self.execute(program, args, cwd, &command_line(program, args))
    }

    fn run_secret(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&Path>,
        secret: &str,
    ) -> io::Result<CommandOutput> {
        self.execute(program, args, cwd, &redacted_line(program, args, secret))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_lines_and_reason() {
        let out = CommandOutput {
            success: false,
            code: Some(2),
            stdout: "one\ntwo\n".to_string(),
            stderr: "boom\n".to_string(),
        };
        assert_eq!(out.lines(), vec!["one", "two", "boom"]);
        assert_eq!(out.failure_reason(), "exit status 2: boom");
        assert_eq!(CommandOutput::failed(1, "").failure_reason(), "exit status 1");
    }

    #[test]
    fn test_command_line() {
        assert_eq!(command_line("uname", &["-r"]), "uname -r");
        assert_eq!(command_line("lsusb", &[]), "lsusb");
    }

    #[test]
    fn test_redacted_line() {
        assert_eq!(
            redacted_line("./wifi", &["connect", "lab", "hunter2", "psk"], "hunter2"),
            "./wifi connect lab <redacted> psk"
        );
        assert_eq!(redacted_line("./wifi", &["connect", "lab", "", "none"], ""), "./wifi connect lab  none");
    }

    #[test]
    fn test_system_runner_run_secret() {
        let out = SystemRunner.run_secret("echo", &["hunter2"], None, "hunter2").unwrap();
        assert_eq!(out.stdout.trim(), "hunter2");
    }

    #[test]
    fn test_system_runner_captures_stdout() {
        let out = SystemRunner.run("echo", &["hello"], None).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_system_runner_missing_program() {
        assert!(SystemRunner
            .run("dutkit-no-such-program", &[], None)
            .is_err());
    }

    #[test]
    fn test_system_runner_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let out = SystemRunner.run("pwd", &[], Some(dir.path())).unwrap();
        let reported = std::path::PathBuf::from(out.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }
}
