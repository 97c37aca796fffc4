use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    /// `command[0]` is executed directly with `command[1..]` as arguments.
    #[default]
    Local,
    /// The command is joined into a single script and run through the
    /// runner's shell with `-c`.
    Shell,
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerKind::Local => write!(f, "local"),
            RunnerKind::Shell => write!(f, "shell"),
        }
    }
}

/// What a session runs. Opaque to the stream layer beyond [`SessionSpec::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpec {
    #[serde(default)]
    pub runner: RunnerKind,
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Shell snippets executed in order before the command; the first failing
    /// step aborts the session.
    #[serde(default)]
    pub bootstrap: Vec<String>,
}

impl SessionSpec {
    pub fn local<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            runner: RunnerKind::Local,
            command: command.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            runner: RunnerKind::Shell,
            command: vec![script.into()],
            ..Default::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_bootstrap(mut self, step: impl Into<String>) -> Self {
        self.bootstrap.push(step.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        let Some(program) = self.command.first() else {
            return Err("command must not be empty".to_string());
        };
        if program.trim().is_empty() {
            return Err("command program must not be blank".to_string());
        }
        if let Some(key) = self
            .env
            .keys()
            .find(|key| key.is_empty() || key.contains('='))
        {
            return Err(format!("invalid environment variable name `{key}`"));
        }
        if let Some(idx) = self.bootstrap.iter().position(|step| step.trim().is_empty()) {
            return Err(format!("bootstrap step {idx} is blank"));
        }
        Ok(())
    }

    /// Human-readable form of the command used in logs.
    pub fn command_preview(&self) -> String {
        self.command.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn accepts_minimal_local_spec() {
        assert_eq!(SessionSpec::local(["echo", "hi"]).validate(), Ok(()));
    }

    #[test]
    fn rejects_empty_command() {
        let spec = SessionSpec::local(Vec::<String>::new());
        assert_eq!(
            spec.validate(),
            Err("command must not be empty".to_string())
        );
    }

    #[test]
    fn rejects_blank_program() {
        assert!(SessionSpec::local(["  "]).validate().is_err());
    }

    #[test]
    fn rejects_bad_env_names() {
        let spec = SessionSpec::local(["true"]).with_env("A=B", "x");
        assert_eq!(
            spec.validate(),
            Err("invalid environment variable name `A=B`".to_string())
        );
        let spec = SessionSpec::local(["true"]).with_env("", "x");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_blank_bootstrap_step() {
        let spec = SessionSpec::shell("true")
            .with_bootstrap("export A=1")
            .with_bootstrap("   ");
        assert_eq!(spec.validate(), Err("bootstrap step 1 is blank".to_string()));
    }

    #[test]
    fn deserializes_with_defaults() {
        let spec: SessionSpec =
            serde_json::from_str(r#"{"command":["ls","-la"]}"#).expect("parse spec");
        assert_eq!(spec.runner, RunnerKind::Local);
        assert!(spec.env.is_empty());
        assert_eq!(spec.command_preview(), "ls -la");
    }
}
