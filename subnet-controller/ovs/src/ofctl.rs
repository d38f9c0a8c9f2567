use crate::{Error, Exec, Output, Result};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

const OFCTL: &str = "ovs-ofctl";
const BRIDGE: &str = "br0";

/// The status setup scripts exit with when the node is already configured.
const ALREADY_SET_UP: i32 = 140;

/// How many times a flow command is attempted before giving up.
#[derive(Copy, Clone, Debug)]
pub struct Retry {
    pub attempts: u32,
    pub backoff: Duration,
}

/// Manages flows on the node's bridge.
#[derive(Clone)]
pub struct Ofctl {
    exec: Arc<dyn Exec>,
    bridge: String,
    retry: Retry,
}

// === impl Retry ===

impl Default for Retry {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

// === impl Ofctl ===

impl Ofctl {
    pub fn new(exec: Arc<dyn Exec>) -> Self {
        Self {
            exec,
            bridge: BRIDGE.to_string(),
            retry: Retry::default(),
        }
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    pub async fn add_flow(&self, rule: &str) -> Result<()> {
        self.ofctl("add-flow", rule).await
    }

    pub async fn del_flows(&self, rule: &str) -> Result<()> {
        self.ofctl("del-flows", rule).await
    }

    /// Runs a node setup script once, treating its "already configured" exit
    /// status as success.
    pub async fn run_setup(&self, script: &str, args: Vec<String>) -> Result<()> {
        match self.run(script, &args).await {
            Ok(_) => {
                info!(script, "Configured node networking");
                Ok(())
            }
            Err(Error::Failed {
                status: Some(ALREADY_SET_UP),
                ..
            }) => {
                info!(script, "Node networking is already configured");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Flow rules are idempotent, so failed commands are retried.
    async fn ofctl(&self, command: &str, rule: &str) -> Result<()> {
        let args = [
            "-O".to_string(),
            "OpenFlow13".to_string(),
            command.to_string(),
            self.bridge.clone(),
            rule.to_string(),
        ];

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run(OFCTL, &args).await {
                Ok(_) => {
                    debug!(command, rule, "Updated flows");
                    return Ok(());
                }
                Err(error) if attempt >= self.retry.attempts => {
                    error!(command, rule, attempt, %error, "Flow update failed");
                    return Err(error);
                }
                Err(error) => {
                    warn!(command, rule, attempt, %error, "Flow update failed, retrying");
                    tokio::time::sleep(self.retry.backoff).await;
                }
            }
        }
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<Output> {
        let output = self
            .exec
            .exec(program, args)
            .await
            .map_err(|source| Error::Spawn {
                program: program.to_string(),
                source,
            })?;
        if output.status != Some(0) {
            return Err(Error::Failed {
                program: program.to_string(),
                args: args.join(" "),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}
