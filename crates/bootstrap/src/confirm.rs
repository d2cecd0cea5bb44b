//! Operator confirmation before re-issuing an existing certificate.

use std::io::{BufRead, IsTerminal, Write};

use async_trait::async_trait;
use tracing::{debug, warn};

/// Asks whether to continue
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Always continue (`--yes`)
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

#[async_trait]
impl Confirm for AssumeYes {
    async fn confirm(&self, prompt: &str) -> bool {
        debug!(prompt, "Confirmed by flag");
        true
    }
}

/// Never continue
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeNo;

#[async_trait]
impl Confirm for AssumeNo {
    async fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

/// Ask on the terminal.
///
/// Declines without prompting when stdin is not a terminal, so unattended
/// runs never re-issue by accident.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirm;

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, prompt: &str) -> bool {
        if !std::io::stdin().is_terminal() {
            debug!("stdin is not a terminal, declining");
            return false;
        }

        let prompt = prompt.to_string();
        let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut stderr = std::io::stderr();
            write!(stderr, "{prompt} [y/N] ")?;
            stderr.flush()?;

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => is_yes(&line),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to read confirmation");
                false
            }
            Err(e) => {
                warn!(error = %e, "Confirmation prompt aborted");
                false
            }
        }
    }
}
