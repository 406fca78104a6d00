//! Command descriptions and command-line parsing.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use super::ProcessError;

/// Immutable description of one process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Overlay one variable on the inherited environment.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn envs<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn env_overlay(&self) -> &[(String, String)] {
        &self.env
    }

    /// Shell-quoted rendering for logs and listings.
    pub fn display(&self) -> String {
        let words =
            std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(words).unwrap_or_else(|_| {
            let mut rendered = self.program.clone();
            for arg in &self.args {
                rendered.push(' ');
                rendered.push_str(arg);
            }
            rendered
        })
    }

    /// Build a Tokio command with stdin closed and both output streams piped.
    ///
    /// On Unix the child leads its own process group so timeouts and kills
    /// reach any grandchildren as well.
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

/// Split a single argument string into words.
///
/// Single and double quotes group words, backslash escapes the next
/// character, and unescaped whitespace is the only separator. Empty quoted
/// strings survive as empty arguments.
pub fn split_command_line(line: &str) -> Result<Vec<String>, ProcessError> {
    shlex::split(line).ok_or_else(|| {
        ProcessError::InvalidCommandLine(format!("unbalanced quotes or trailing escape in `{line}`"))
    })
}

/// Parse `KEY=VALUE` entries into an environment overlay.
pub fn parse_env(items: &[String]) -> Result<Vec<(String, String)>, ProcessError> {
    let mut env = Vec::with_capacity(items.len());
    for item in items {
        match item.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                env.push((key.to_string(), value.to_string()));
            }
            _ => return Err(ProcessError::InvalidEnv(item.clone())),
        }
    }
    Ok(env)
}
