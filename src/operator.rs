use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines, Stdin},
    sync::Mutex,
};

/// What the human running the patcher decided at a checkpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    Continue,
    Abort,
}

/// The points where the patcher stops and waits for a human
#[async_trait]
pub(crate) trait Operator: Send + Sync {
    /// Asked once before the first live patch of a run
    async fn confirm_patching(&self, summary: &str) -> Result<Decision>;

    /// Asked whenever rollouts didn't complete in time. There is no automatic way forward, the
    /// operator has to look at the cluster and decide.
    async fn acknowledge_rollout_failures(&self, failures: &[String]) -> Result<Decision>;
}

/// Prompts on stdout and reads answers line by line. The reader is kept for the whole run so
/// answers piped in ahead of time aren't lost between prompts.
pub(crate) struct TerminalOperator<R = Stdin> {
    assume_yes: bool,
    answers: Mutex<Lines<BufReader<R>>>,
}

impl TerminalOperator {
    pub(crate) fn new(assume_yes: bool) -> Self {
        Self::with_input(tokio::io::stdin(), assume_yes)
    }
}

impl<R: AsyncRead + Unpin + Send> TerminalOperator<R> {
    pub(crate) fn with_input(input: R, assume_yes: bool) -> Self {
        Self {
            assume_yes,
            answers: Mutex::new(BufReader::new(input).lines()),
        }
    }

    /// None when the input is closed, which is never taken as consent
    async fn ask(&self, question: &str) -> Result<Option<String>> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(question.as_bytes()).await.context("writing prompt")?;
        stdout.flush().await.context("flushing prompt")?;

        let answer = self.answers.lock().await.next_line().await.context("reading answer from stdin")?;

        Ok(answer.map(|answer| answer.trim().to_lowercase()))
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> Operator for TerminalOperator<R> {
    async fn confirm_patching(&self, summary: &str) -> Result<Decision> {
        if self.assume_yes {
            log::info!("--yes given, not asking for confirmation");
            return Ok(Decision::Continue);
        }

        Ok(match self.ask(&format!("{summary}\nProceed with patching? [y/N] ")).await?.as_deref() {
            Some("y" | "yes") => Decision::Continue,
            _ => Decision::Abort,
        })
    }

    async fn acknowledge_rollout_failures(&self, failures: &[String]) -> Result<Decision> {
        // --yes only skips the initial confirmation, a stuck rollout always needs a human
        let question = format!(
            "The following rollouts did not complete:\n  {}\nFix them, then press enter to continue or type 'abort' to stop: ",
            failures.join("\n  ")
        );

        Ok(match self.ask(&question).await?.as_deref() {
            None | Some("abort" | "a" | "q") => Decision::Abort,
            Some(_) => Decision::Continue,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_piped_answers_are_read_in_order() -> Result<()> {
        let operator = TerminalOperator::with_input(&b"y\n\nabort\n"[..], false);

        assert_eq!(operator.confirm_patching("About to patch").await?, Decision::Continue);
        assert_eq!(operator.acknowledge_rollout_failures(&["shop/a".to_string()]).await?, Decision::Continue);
        assert_eq!(operator.acknowledge_rollout_failures(&["shop/b".to_string()]).await?, Decision::Abort);

        Ok(())
    }

    #[tokio::test]
    async fn test_closed_input_aborts() -> Result<()> {
        let operator = TerminalOperator::with_input(&b""[..], false);

        assert_eq!(operator.confirm_patching("About to patch").await?, Decision::Abort);
        assert_eq!(operator.acknowledge_rollout_failures(&["shop/a".to_string()]).await?, Decision::Abort);

        Ok(())
    }

    #[tokio::test]
    async fn test_assume_yes_skips_confirmation_only() -> Result<()> {
        let operator = TerminalOperator::with_input(&b"abort\n"[..], true);

        assert_eq!(operator.confirm_patching("About to patch").await?, Decision::Continue);
        assert_eq!(operator.acknowledge_rollout_failures(&["shop/a".to_string()]).await?, Decision::Abort);

        Ok(())
    }
}
