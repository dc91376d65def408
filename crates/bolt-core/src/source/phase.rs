//! Build phase execution.
//!
//! Each phase body is piped into `/bin/sh -e -x -s`, preceded by the helper
//! fragments found on the helper search path. The child environment is
//! built from scratch; only a fixed allow-list leaks through from the
//! invoking process.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use bolt_schema::BuildRules;

use crate::error::SourceError;
use crate::reporter::{NullReporter, Reporter};
use crate::source::{Phase, Platform};
use crate::tool::{ToolError, wait_child};

const SHELL: &str = "/bin/sh";
const HELPERS: [&str; 2] = ["arch.sh", "python.sh"];
const DEFAULT_PATH: &str = "/bin:/sbin:/usr/bin:/usr/sbin:/usr/local/bin";

/// Directory defines owned by the orchestrator; never inherited.
const PROTECTED_VARS: [&str; 4] = [
    "BOLT_WORK_DIR",
    "BOLT_SOURCE_DIR",
    "BOLT_BUILD_DIR",
    "BOLT_INSTALL_DIR",
];

fn is_inherited(key: &str) -> bool {
    if PROTECTED_VARS.contains(&key) {
        return false;
    }
    key.starts_with("BOLT_") || matches!(key, "PATH" | "USER" | "USERNAME")
}

pub struct PhaseRunner {
    rules: BuildRules,
    platform: Platform,
    helpers_path: Vec<PathBuf>,
    timeout: Option<Duration>,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for PhaseRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseRunner")
            .field("platform", &self.platform)
            .field("helpers_path", &self.helpers_path)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PhaseRunner {
    pub fn new(rules: BuildRules, platform: Platform, helpers_path: Vec<PathBuf>) -> Self {
        Self {
            rules,
            platform,
            helpers_path,
            timeout: None,
            reporter: Arc::new(NullReporter),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    fn body(&self, phase: Phase) -> &str {
        match phase {
            Phase::Prepare => &self.rules.prepare,
            Phase::Build => &self.rules.build,
            Phase::Install => &self.rules.install,
            Phase::Clean => &self.rules.clean,
        }
    }

    /// The child environment for a phase.
    ///
    /// Layered as: `defines`, then platform build flags, then
    /// `BOLT_PARALLEL_JOBS`, then the allowed subset of `invoking`.
    pub fn environment<I>(
        &self,
        defines: &BTreeMap<String, String>,
        invoking: I,
    ) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env = defines.clone();
        env.extend(
            self.platform
                .build_flags()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        env.insert(
            "BOLT_PARALLEL_JOBS".to_string(),
            self.platform.parallel_jobs().to_string(),
        );
        env.extend(invoking.into_iter().filter(|(k, _)| is_inherited(k)));
        env.entry("PATH".to_string())
            .or_insert_with(|| DEFAULT_PATH.to_string());
        env
    }

    /// Concatenated helper fragments, first match per helper name.
    pub fn load_helpers(&self) -> String {
        let mut fragments = Vec::new();
        for helper in HELPERS {
            let found = self
                .helpers_path
                .iter()
                .map(|dir| dir.join(helper))
                .find(|path| path.is_file());
            let Some(path) = found else {
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(text) => fragments.push(text),
                Err(e) => tracing::warn!("Cannot read helper {}: {e}", path.display()),
            }
        }
        fragments.join("\n")
    }

    /// Full shell script for `phase`.
    pub fn script(&self, phase: Phase) -> String {
        format!("{}\n{}", self.load_helpers(), self.body(phase))
    }

    /// Run `phase` in `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Phase`] if the shell cannot be started, exits
    /// non-zero, or exceeds the configured timeout.
    pub fn run(
        &self,
        phase: Phase,
        defines: &BTreeMap<String, String>,
        work_dir: &Path,
    ) -> Result<(), SourceError> {
        let phase_err = |detail: String| SourceError::Phase { phase, detail };

        self.reporter.phase(phase.as_str());
        tracing::info!("Running {phase} phase in {}", work_dir.display());

        let invoking = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
        let env = self.environment(defines, invoking);
        let script = self.script(phase);

        let mut child = Command::new(SHELL)
            .args(["-e", "-x", "-s"])
            .env_clear()
            .envs(&env)
            .current_dir(work_dir)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| phase_err(format!("cannot start {SHELL}: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(script.as_bytes()) {
                // The shell stops reading once a command fails under -e.
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(phase_err(format!("cannot write script: {e}")));
                }
            }
        }

        let status = wait_child(&mut child, SHELL, self.timeout).map_err(|e| match e {
            ToolError::TimedOut { secs, .. } => phase_err(format!("timed out after {secs}s")),
            other => phase_err(other.to_string()),
        })?;

        if !status.success() {
            return Err(phase_err(format!("shell exited with {status}")));
        }
        tracing::debug!("{phase} phase finished");
        Ok(())
    }
}
