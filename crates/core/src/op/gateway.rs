//! The single seam through which vaultmigrate runs the `op` binary.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::OpError;

/// Environment variable `op` reads a service account token from.
const SERVICE_ACCOUNT_TOKEN_VAR: &str = "OP_SERVICE_ACCOUNT_TOKEN";

/// One invocation of the CLI.
#[derive(Clone, Default)]
pub struct OpRequest {
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub service_account_token: Option<String>,
}

impl OpRequest {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_stdin(mut self, stdin: Vec<u8>) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.service_account_token = token;
        self
    }

    /// The command line as logged (the token is never part of it).
    pub fn display_args(&self) -> String {
        self.args.join(" ")
    }
}

impl fmt::Debug for OpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpRequest")
            .field("args", &self.args)
            .field("stdin_bytes", &self.stdin.as_ref().map(Vec::len))
            .field(
                "service_account_token",
                &self.service_account_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Raw result of one invocation.
#[derive(Debug, Clone, Default)]
pub struct OpOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl OpOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`OpError::CommandFailed`].
    pub fn into_result(self) -> Result<Vec<u8>, OpError> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(OpError::CommandFailed {
                exit_code: self.exit_code,
                stderr: String::from_utf8_lossy(&self.stderr).trim().to_string(),
            })
        }
    }
}

/// Runs the `op` CLI. One blocking round-trip per call, no retries, no
/// timeout: a hung `op` process hangs the caller.
#[async_trait]
pub trait OpGateway: Send + Sync {
    /// Invoke the CLI. A non-zero exit code is returned as a normal
    /// [`OpOutput`]; only failing to run the binary at all is an `Err`.
    async fn invoke(&self, request: OpRequest) -> Result<OpOutput, OpError>;
}

/// [`OpGateway`] that spawns the real binary.
#[derive(Debug, Clone)]
pub struct ProcessGateway {
    binary: String,
}

impl ProcessGateway {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl OpGateway for ProcessGateway {
    async fn invoke(&self, request: OpRequest) -> Result<OpOutput, OpError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&request.args)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(token) = &request.service_account_token {
            cmd.env(SERVICE_ACCOUNT_TOKEN_VAR, token);
        }

        debug!(cmd = %format!("{} {}", self.binary, request.display_args()), "running op command");
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OpError::BinaryNotFound(self.binary.clone())
            } else {
                OpError::IoError(e)
            }
        })?;

        // Feed stdin while draining stdout so neither pipe can fill up and
        // stall the other. Dropping the handle closes the pipe (EOF for `op`).
        let stdin_pipe = child.stdin.take();
        let feed = async move {
            if let (Some(mut pipe), Some(input)) = (stdin_pipe, request.stdin) {
                pipe.write_all(&input).await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;
        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            warn!(
                exit_code,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "op command failed"
            );
        }

        Ok(OpOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_debug_redacts_token() {
        let req = OpRequest::new(["vault", "list"]).with_token(Some("ops_secret".into()));
        let rendered = format!("{:?}", req);
        assert!(!rendered.contains("ops_secret"));
        assert!(rendered.contains("<redacted>"));
        assert_eq!(req.display_args(), "vault list");
    }

    #[test]
    fn test_output_into_result() {
        let ok = OpOutput {
            exit_code: 0,
            stdout: b"[]".to_vec(),
            stderr: Vec::new(),
        };
        assert_eq!(ok.into_result().unwrap(), b"[]".to_vec());

        let failed = OpOutput {
            exit_code: 1,
            stdout: Vec::new(),
            stderr: b"[ERROR] not signed in\n".to_vec(),
        };
        match failed.into_result() {
            Err(OpError::CommandFailed { exit_code, stderr }) => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "[ERROR] not signed in");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let gateway = ProcessGateway::new("/nonexistent/op-binary");
        let result = gateway.invoke(OpRequest::new(["--version"])).await;
        assert!(matches!(result, Err(OpError::BinaryNotFound(_))));
    }
}
