//! Terminal handler for interactive runs.

use async_trait::async_trait;
use deskrun_agent::{
    ActionHandler, AgentMessage, EngineError, InputReply, PendingOperation, SafetyCheck,
};
use deskrun_core::ActionOutput;
use tokio::io::{
    self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};
use tokio::sync::Mutex;
use tracing::info;

/// Operator words that end a run.
fn is_exit(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "exit" | "quit")
}

/// Interpret an answer to an input request.
pub fn parse_reply(line: &str) -> InputReply {
    let answer = line.trim();
    if is_exit(answer) {
        InputReply::Abort
    } else {
        InputReply::Respond(answer.to_string())
    }
}

/// Interpret an answer to a safety check. Only `ack` proceeds.
pub fn parse_ack(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("ack")
}

struct Console<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn say(&mut self, text: &str) -> std::io::Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await
    }

    /// Read one line; `None` at end of input.
    async fn ask(&mut self, prompt: &str) -> std::io::Result<Option<String>> {
        self.say(prompt).await?;
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

/// Resolves pauses by asking the operator on a terminal.
///
/// Runs executing in parallel share one handler; the console lock keeps
/// their questions from interleaving.
pub struct ConsoleHandler<R = BufReader<Stdin>, W = Stdout> {
    console: Mutex<Console<R, W>>,
}

impl ConsoleHandler {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R, W> ConsoleHandler<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            console: Mutex::new(Console { reader, writer }),
        }
    }

    #[cfg(test)]
    fn into_writer(self) -> W {
        self.console.into_inner().writer
    }
}

#[async_trait]
impl<R, W> ActionHandler for ConsoleHandler<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn on_input(&self, messages: Vec<AgentMessage>) -> Result<InputReply, EngineError> {
        let mut console = self.console.lock().await;
        for message in &messages {
            console
                .say(&format!("\nAgent asks: {}\n", message.joined_text()))
                .await?;
        }

        let reply = match console.ask("Enter your response (or 'exit'/'quit'): ").await? {
            Some(line) => parse_reply(&line),
            None => InputReply::Abort,
        };
        if reply == InputReply::Abort {
            console.say("Exiting as per operator request.\n").await?;
            info!("Operator ended the run at an input request");
        }
        Ok(reply)
    }

    async fn on_safety_check(
        &self,
        checks: Vec<SafetyCheck>,
        operation: PendingOperation,
    ) -> Result<bool, EngineError> {
        let mut console = self.console.lock().await;
        console.say("\n").await?;
        for check in &checks {
            console
                .say(&format!("Pending safety check: {}\n", check.message))
                .await?;
        }
        console
            .say(&format!(
                "Acknowledge the check(s) to run '{}'.\n",
                operation.action
            ))
            .await?;

        let proceed = console
            .ask("Type 'ack' to confirm, or 'exit'/'quit': ")
            .await?
            .map(|line| parse_ack(&line))
            .unwrap_or(false);

        if proceed {
            console.say("Acknowledged. Proceeding...\n").await?;
        } else {
            console.say("Not acknowledged. Stopping the run.\n").await?;
        }
        Ok(proceed)
    }

    async fn on_complete(&self, output: &ActionOutput) {
        let mut console = self.console.lock().await;
        let _ = console.say(&format!("\nTask completed: {}\n", output)).await;
    }

    async fn on_error(&self, message: &str) {
        let mut console = self.console.lock().await;
        let _ = console.say(&format!("ERROR: {}\n", message)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(input: &'static str) -> ConsoleHandler<BufReader<&'static [u8]>, Vec<u8>> {
        ConsoleHandler::new(BufReader::new(input.as_bytes()), Vec::new())
    }

    fn operation() -> PendingOperation {
        PendingOperation {
            call_id: "call-1".to_string(),
            action: "click".to_string(),
            arguments: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(
            parse_reply("  looks right\n"),
            InputReply::Respond("looks right".to_string())
        );
        assert_eq!(parse_reply("QUIT"), InputReply::Abort);
        assert_eq!(parse_reply("exit\n"), InputReply::Abort);
    }

    #[test]
    fn test_parse_ack() {
        assert!(parse_ack("ack\n"));
        assert!(parse_ack(" ACK "));
        assert!(!parse_ack("yes"));
        assert!(!parse_ack("exit"));
    }

    #[tokio::test]
    async fn test_input_reply_is_read_from_console() {
        let console = handler("yes, continue\n");
        let reply = console
            .on_input(vec![AgentMessage::text("Does this list look correct?")])
            .await
            .unwrap();

        assert_eq!(reply, InputReply::Respond("yes, continue".to_string()));
        let shown = String::from_utf8(console.into_writer()).unwrap();
        assert!(shown.contains("Agent asks: Does this list look correct?"));
    }

    #[tokio::test]
    async fn test_end_of_input_aborts() {
        let console = handler("");
        assert_eq!(console.on_input(vec![]).await.unwrap(), InputReply::Abort);
        assert!(!console.on_safety_check(vec![], operation()).await.unwrap());
    }

    #[tokio::test]
    async fn test_safety_check_needs_ack() {
        let checks = vec![SafetyCheck {
            id: "sc-1".to_string(),
            code: None,
            message: "Page asks for a password".to_string(),
        }];

        let console = handler("ack\nno\n");
        assert!(console.on_safety_check(checks.clone(), operation()).await.unwrap());
        assert!(!console.on_safety_check(checks, operation()).await.unwrap());

        let shown = String::from_utf8(console.into_writer()).unwrap();
        assert!(shown.contains("Pending safety check: Page asks for a password"));
    }
}
