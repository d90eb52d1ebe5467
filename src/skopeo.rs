use std::path::Path;
use std::process::ExitStatus;

use thiserror::Error;
use tokio::process::Command;
use tracing::trace;

const DEFAULT_BINARY: &str = "skopeo";

#[derive(Debug, Error)]
pub enum SkopeoError {
    #[error("failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },
    #[error("'{binary}' exited with {status}: {output}")]
    Failed {
        binary: String,
        status: ExitStatus,
        output: String,
    },
}

/// Invokes the external copy tool as a child process. The tool retries
/// transient registry failures itself, so callers do not retry on top.
#[derive(Debug, Clone)]
pub struct Skopeo {
    binary: String,
}

impl Default for Skopeo {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
        }
    }
}

impl Skopeo {
    #[cfg(test)]
    pub fn with_binary(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    /// Copies `source` to `target`, reading source credentials from an auth
    /// file and pushing with `user:password` target credentials when given.
    pub async fn copy(
        &self,
        source: &str,
        src_authfile: Option<&Path>,
        target: &str,
        dest_creds: Option<&str>,
    ) -> Result<(), SkopeoError> {
        self.run(copy_args(source, src_authfile, target, dest_creds))
            .await
    }

    /// Probes `reference` for existence; any non-zero exit means the probe
    /// failed, which callers treat as "not present".
    pub async fn inspect(&self, reference: &str, creds: Option<&str>) -> Result<(), SkopeoError> {
        self.run(inspect_args(reference, creds)).await
    }

    async fn run(&self, args: Vec<String>) -> Result<(), SkopeoError> {
        let output = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SkopeoError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        trace!(binary = %self.binary, ?args, output = %combined, "executed copy tool");

        if !output.status.success() {
            return Err(SkopeoError::Failed {
                binary: self.binary.clone(),
                status: output.status,
                output: combined.trim().to_string(),
            });
        }
        Ok(())
    }
}

fn copy_args(
    source: &str,
    src_authfile: Option<&Path>,
    target: &str,
    dest_creds: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "--override-os".to_string(),
        "linux".to_string(),
        "copy".to_string(),
        "--retry-times".to_string(),
        "3".to_string(),
        format!("docker://{source}"),
        format!("docker://{target}"),
    ];

    match src_authfile {
        Some(path) => {
            args.push("--src-authfile".to_string());
            args.push(path.display().to_string());
        }
        None => args.push("--src-no-creds".to_string()),
    }

    match dest_creds {
        Some(creds) => {
            args.push("--dest-creds".to_string());
            args.push(creds.to_string());
        }
        None => args.push("--dest-no-creds".to_string()),
    }

    args
}

fn inspect_args(reference: &str, creds: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "inspect".to_string(),
        "--retry-times".to_string(),
        "3".to_string(),
        format!("docker://{reference}"),
    ];
    if let Some(creds) = creds {
        args.push("--creds".to_string());
        args.push(creds.to_string());
    }
    args
}
