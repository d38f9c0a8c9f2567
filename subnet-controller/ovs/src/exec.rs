/// The result of running a program to completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    /// The exit code, or `None` if the program was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external programs.
#[async_trait::async_trait]
pub trait Exec: Send + Sync + 'static {
    async fn exec(&self, program: &str, args: &[String]) -> std::io::Result<Output>;
}

/// Runs programs as child processes.
#[derive(Clone, Debug, Default)]
pub struct ProcessExec(());

// === impl ProcessExec ===

#[async_trait::async_trait]
impl Exec for ProcessExec {
    async fn exec(&self, program: &str, args: &[String]) -> std::io::Result<Output> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(Output {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
