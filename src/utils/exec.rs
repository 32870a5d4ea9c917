use std::process::{Command, Output};

use anyhow::{bail, Result};
use log::debug;

/// Render a command with its arguments for diagnostics
pub fn command_to_string(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy();
    let args = cmd
        .get_args()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");
    format!("{} {}", program, args)
}

///////////////////////////////
/// Run an external tool synchronously with captured output.
/// A non-zero exit becomes an error carrying the failing command line and
/// the tool's stderr
pub fn run_tool(cmd: &mut Command) -> Result<Output> {
    let rendered = command_to_string(cmd);
    debug!("{}", rendered);

    let output = match cmd.output() {
        Ok(output) => output,
        Err(e) => bail!("{} --> failed to start: {}", rendered, e),
    };
    if !output.status.success() {
        bail!(
            "{} --> exit code {} --> {}",
            rendered,
            output.status.code().map_or("?".to_string(), |c| c.to_string()),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_program_and_args() {
        let mut cmd = Command::new("vsearch");
        cmd.arg("--cluster_fast").arg("input.fna");
        assert_eq!(command_to_string(&cmd), "vsearch --cluster_fast input.fna");
    }

    #[test]
    fn nonzero_exit_reports_the_command() {
        let mut cmd = Command::new("false");
        let err = run_tool(&mut cmd).unwrap_err().to_string();
        assert!(err.starts_with("false"), "{}", err);
    }

    #[test]
    fn missing_tool_is_an_error() {
        let mut cmd = Command::new("definitely-not-a-tool-on-path");
        assert!(run_tool(&mut cmd).is_err());
    }
}
