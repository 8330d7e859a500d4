//! CF-010: Process transport for command units.

pub mod local;

pub use local::exec_local;

/// Output of a finished script.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty stderr line, for compact error messages.
    pub fn stderr_tail(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }
}

/// Environment variables handed to a script, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ScriptEnv {
    vars: Vec<(String, String)>,
}

impl ScriptEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.push((key.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cf010_stderr_tail() {
        let out = ExecOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "warning: x\nfatal: no token\n\n".to_string(),
        };
        assert!(!out.success());
        assert_eq!(out.stderr_tail(), "fatal: no token");
    }

    #[test]
    fn test_cf010_script_env_last_set_wins() {
        let mut env = ScriptEnv::new();
        env.set("A", "1");
        env.set("A", "2");
        assert_eq!(env.get("A"), Some("2"));
        assert_eq!(env.len(), 2);
        assert!(env.get("B").is_none());
    }
}
