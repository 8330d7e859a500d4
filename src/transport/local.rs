//! CF-011: Local execution through `bash`.

use super::{ExecOutput, ScriptEnv};
use std::process::{Command, Stdio};
use tracing::debug;

/// Run `script` with `bash -c`, adding `env` to the inherited environment.
///
/// Stdin is `/dev/null`, so commands in the script that read stdin see EOF
/// instead of consuming the script text.
pub fn exec_local(script: &str, env: &ScriptEnv) -> Result<ExecOutput, String> {
    let mut command = Command::new("bash");
    command
        .arg("-c")
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env.iter() {
        command.env(key, value);
    }

    debug!(vars = env.len(), bytes = script.len(), "spawning bash");
    let child = command
        .spawn()
        .map_err(|e| format!("failed to spawn bash: {}", e))?;

    let output = child
        .wait_with_output()
        .map_err(|e| format!("wait error: {}", e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
