//! External tool invocation.
//!
//! Tools are located once by name on `PATH` and run as blocking
//! subprocesses. Output is captured into an anonymous temp file so a chatty
//! tool can never fill a pipe while we wait on it. An optional timeout
//! wraps the whole call; expiry kills the child and counts as failure.

use std::ffi::{OsStr, OsString};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use wait_timeout::ChildExt;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("'{0}' not found in PATH")]
    NotFound(String),

    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },

    #[error("{tool} failed ({status}): {output}")]
    Failed {
        tool: String,
        status: String,
        output: String,
    },

    #[error("{tool} timed out after {secs}s")]
    TimedOut { tool: String, secs: u64 },
}

/// A located external program.
#[derive(Debug, Clone)]
pub struct Tool {
    name: String,
    program: PathBuf,
    base_args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl Tool {
    /// Locate `name` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] if no executable of that name exists.
    pub fn find(name: &str) -> Result<Self, ToolError> {
        which::which(name)
            .map(|program| Self::at(name, program))
            .map_err(|_| ToolError::NotFound(name.to_string()))
    }

    /// Locate `<host>-<name>`, falling back to plain `name`.
    ///
    /// Cross toolchains install binutils with a triplet prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] if neither variant exists.
    pub fn find_for_host(host: Option<&str>, name: &str) -> Result<Self, ToolError> {
        if let Some(host) = host.filter(|h| !h.is_empty()) {
            if let Ok(tool) = Self::find(&format!("{host}-{name}")) {
                return Ok(tool);
            }
        }
        Self::find(name)
    }

    /// Use an explicit program path.
    pub fn at(name: &str, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            program: program.into(),
            base_args: Vec::new(),
            timeout: None,
        }
    }

    /// Run a shell script through `/bin/sh` under the given tool name.
    pub fn script(name: &str, script: &Path) -> Self {
        Self {
            name: name.to_string(),
            program: PathBuf::from("/bin/sh"),
            base_args: vec![script.as_os_str().to_owned()],
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// A [`Command`] for this tool with its base arguments applied.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args);
        cmd
    }

    /// Run the tool and return its combined stdout/stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Failed`] on non-zero exit, [`ToolError::TimedOut`]
    /// if the configured timeout expires, or a spawn error.
    pub fn run<I, S>(&self, args: I) -> Result<String, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let spawn_err = |source: std::io::Error| ToolError::Spawn {
            tool: self.name.clone(),
            source,
        };

        let mut log = tempfile::tempfile().map_err(spawn_err)?;
        let stdout = log.try_clone().map_err(spawn_err)?;
        let stderr = log.try_clone().map_err(spawn_err)?;

        let mut child = match self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::NotFound(self.name.clone()));
            }
            Err(e) => return Err(spawn_err(e)),
        };

        let status = wait_child(&mut child, &self.name, self.timeout)?;

        let mut raw = Vec::new();
        log.seek(SeekFrom::Start(0)).map_err(spawn_err)?;
        log.read_to_end(&mut raw).map_err(spawn_err)?;
        let output = String::from_utf8_lossy(&raw).trim().to_string();

        if !status.success() {
            return Err(ToolError::Failed {
                tool: self.name.clone(),
                status: status.to_string(),
                output,
            });
        }

        Ok(output)
    }
}

/// Wait for `child`, killing it if `timeout` expires first.
///
/// # Errors
///
/// Returns [`ToolError::TimedOut`] on expiry or [`ToolError::Spawn`] if
/// waiting fails.
pub fn wait_child(
    child: &mut Child,
    tool: &str,
    timeout: Option<Duration>,
) -> Result<ExitStatus, ToolError> {
    let wait_err = |source| ToolError::Spawn {
        tool: tool.to_string(),
        source,
    };

    let Some(timeout) = timeout else {
        return child.wait().map_err(wait_err);
    };

    match child.wait_timeout(timeout).map_err(wait_err)? {
        Some(status) => Ok(status),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Err(ToolError::TimedOut {
                tool: tool.to_string(),
                secs: timeout.as_secs(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_output() {
        let tool = Tool::at("sh", "/bin/sh");
        let out = tool.run(["-c", "echo hello; echo oops >&2"]).unwrap();
        assert!(out.contains("hello"));
        assert!(out.contains("oops"));
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        let tool = Tool::at("sh", "/bin/sh");
        match tool.run(["-c", "echo broken; exit 3"]) {
            Err(ToolError::Failed { tool, output, .. }) => {
                assert_eq!(tool, "sh");
                assert_eq!(output, "broken");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_timeout_is_failure() {
        let tool = Tool::at("sh", "/bin/sh").with_timeout(Some(Duration::from_millis(100)));
        assert!(matches!(
            tool.run(["-c", "sleep 5"]),
            Err(ToolError::TimedOut { .. })
        ));
    }

    #[test]
    fn test_missing_program() {
        assert!(matches!(
            Tool::find("definitely-not-a-real-tool-xyz"),
            Err(ToolError::NotFound(_))
        ));
        let tool = Tool::at("ghost", "/nonexistent/ghost");
        assert!(matches!(tool.run(["x"]), Err(ToolError::NotFound(_))));
    }

    #[test]
    fn test_script_tool() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake.sh");
        std::fs::write(&script, "echo \"args: $*\"\n").unwrap();
        let tool = Tool::script("fake", &script);
        assert_eq!(tool.run(["a", "b"]).unwrap(), "args: a b");
    }
}
