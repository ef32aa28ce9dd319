// External command execution

//! External command execution
//!
//! Every interaction with `nft`, `ip` and `wg-quick` goes through a
//! [`CommandExecutor`], so the firewall controller, the tunnel controller and
//! the runner can be driven by a scripted fake in tests instead of root
//! privileges and a live kernel firewall.

use std::env;
use std::future::Future;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Captured result of one external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `-1` if the process was killed by a signal
    pub code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Exited with status 0
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// stdout followed by stderr, trimmed
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr).trim().to_string()
    }

    /// stderr, or stdout when stderr is empty
    pub fn diagnostic(&self) -> String {
        let err = self.stderr.trim();
        if err.is_empty() {
            self.stdout.trim().to_string()
        } else {
            err.to_string()
        }
    }
}

/// Runs external programs
pub trait CommandExecutor: Send + Sync {
    /// Whether `program` can be found on `PATH`
    fn has_program(&self, program: &str) -> bool;

    /// Run `program` with `args`, feeding `stdin` if given, and wait for it
    ///
    /// A non-zero exit is reported through [`CommandOutput::code`]; only a
    /// failure to spawn or talk to the process is an `Err`.
    fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> impl Future<Output = io::Result<CommandOutput>> + Send;
}

/// Regular file with at least one execute bit set
fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Executor spawning real processes with tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn has_program(&self, program: &str) -> bool {
        if program.contains('/') {
            return is_executable(Path::new(program));
        }
        env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).any(|dir| is_executable(&dir.join(program))))
            .unwrap_or(false)
    }

    async fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> io::Result<CommandOutput> {
        log::debug!("exec: {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            // Close stdin so the child sees EOF
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_diagnostic_prefers_stderr() {
        let out = CommandOutput {
            code: 1,
            stdout: "partial\n".to_string(),
            stderr: "Error: syntax\n".to_string(),
        };
        assert_eq!(out.diagnostic(), "Error: syntax");
        assert!(!out.success());
    }

    #[test]
    fn test_output_diagnostic_falls_back_to_stdout() {
        let out = CommandOutput {
            code: 1,
            stdout: " only stdout ".to_string(),
            stderr: String::new(),
        };
        assert_eq!(out.diagnostic(), "only stdout");
    }

    #[test]
    fn test_output_combined() {
        let out = CommandOutput {
            code: 0,
            stdout: "a\n".to_string(),
            stderr: "b\n".to_string(),
        };
        assert_eq!(out.combined(), "a\nb");
    }

    #[test]
    fn test_has_program_absolute_path() {
        assert!(!SystemExecutor.has_program("/nonexistent/bin/nft"));
    }

    #[test]
    fn test_has_program_requires_execute_bit() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("nft");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();

        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!SystemExecutor.has_program(tool.to_str().unwrap()));

        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(SystemExecutor.has_program(tool.to_str().unwrap()));

        assert!(!SystemExecutor.has_program(dir.path().to_str().unwrap()));
    }

    #[test]
    fn test_has_program_unknown_name() {
        assert!(!SystemExecutor.has_program("routeguard-no-such-binary"));
    }

    #[tokio::test]
    async fn test_run_missing_program_is_err() {
        let result = SystemExecutor
            .run("routeguard-no-such-binary", &[], None)
            .await;
        assert!(result.is_err());
    }
}
