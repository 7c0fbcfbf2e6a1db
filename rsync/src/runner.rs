use async_trait::async_trait;

/// Captured result of one finished command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Executes external commands.
///
/// The copy engine never touches `std::process` directly; everything goes
/// through a runner handed in at construction time. Production uses
/// [`SystemRunner`], tests script one (see [`crate::testing`]).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// Runner on top of `tokio::process`.
///
/// Children are spawned with `kill_on_drop`, so a worker task that gets
/// aborted takes its rsync child down with it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        tracing::debug!("running {} {:?}", program, args);
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        // a child killed by a signal has no exit code; -1 keeps it clearly
        // outside the set of codes we ever accept
        let code = output.status.code().unwrap_or(-1);
        tracing::debug!("{} exited with code {}", program, code);
        Ok(CommandOutput {
            code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
