//! Error types for gitops-compose.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// All errors that can arise from invoking the deployment tool.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The process could not be started or waited on.
    #[error("unable to run `{command}` in {workdir}: {source}")]
    Launch {
        command: String,
        workdir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and reported failure.
    #[error("`{command}` failed ({})", exit_label(.code))]
    Failed { command: String, code: Option<i32> },

    /// The process did not exit within the configured timeout and was killed.
    #[error("`{command}` did not finish within {}s", .timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}
