use anyhow::{bail, Context, Result};
use std::{fmt, process::Stdio};
use tokio::process::Command;
use tracing::debug;

/// One external program invocation. Secrets belong in `env`, which is
/// never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);
        cmd
    }
}

/// Program and arguments; env values are replaced by their keys.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, _) in &self.env {
            write!(f, "{key}=<redacted> ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandSpec({self})")
    }
}

/// `producer | consumer`: the producer's stdout feeds the consumer's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpec {
    pub producer: CommandSpec,
    pub consumer: CommandSpec,
}

impl fmt::Display for PipelineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.producer, self.consumer)
    }
}

/// Runs external pipelines. Ok only when both sides exit successfully.
#[allow(async_fn_in_trait)]
pub trait ProcessRunner {
    async fn run_pipeline(&self, spec: &PipelineSpec) -> Result<()>;
}

/// Spawns real processes with tokio and waits for both ends.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioRunner;

impl ProcessRunner for TokioRunner {
    async fn run_pipeline(&self, spec: &PipelineSpec) -> Result<()> {
        debug!(pipeline = %spec, "spawning");

        let mut producer = spec
            .producer
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawning {}", spec.producer.program))?;

        let stdout = producer
            .stdout
            .take()
            .context("producer stdout was not captured")?;
        let stdin: Stdio = stdout
            .try_into()
            .context("handing producer stdout to consumer")?;

        let mut consumer = spec
            .consumer
            .command()
            .stdin(stdin)
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawning {}", spec.consumer.program))?;

        let (producer_status, consumer_status) = tokio::join!(producer.wait(), consumer.wait());
        let producer_status =
            producer_status.with_context(|| format!("waiting for {}", spec.producer.program))?;
        let consumer_status =
            consumer_status.with_context(|| format!("waiting for {}", spec.consumer.program))?;

        if !producer_status.success() {
            bail!("{} exited with {}", spec.producer.program, producer_status);
        }
        if !consumer_status.success() {
            bail!("{} exited with {}", spec.consumer.program, consumer_status);
        }
        Ok(())
    }
}
