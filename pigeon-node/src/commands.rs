//! Console commands and the non-blocking sources that yield them.

use std::collections::VecDeque;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Invite(String),
    Accept(String),
    Leave,
    Say(String),
    ListMembers,
    ListPending,
    ShowDirectory,
    Help,
    Quit,
}

const QUIT_WORDS: [&str; 4] = ["bye", "exit", "quit", "stop"];

/// Parse one console line. Blank lines yield nothing.
pub fn parse(line: &str) -> Option<Command> {
    let line = line.trim_end_matches(['\r', '\n']);
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if QUIT_WORDS.contains(&trimmed) {
        return Some(Command::Quit);
    }
    let cmd = match trimmed {
        "?" | "help" => Command::Help,
        "*" => Command::ShowDirectory,
        "." => Command::Leave,
        ">" => Command::ListMembers,
        "<" => Command::ListPending,
        _ => {
            if let Some(name) = trimmed.strip_prefix('>') {
                Command::Invite(name.trim().to_owned())
            } else if let Some(name) = trimmed.strip_prefix('<') {
                Command::Accept(name.trim().to_owned())
            } else {
                Command::Say(line.to_owned())
            }
        }
    };
    Some(cmd)
}

/// Where the node loop gets its next command. Must not block.
pub trait CommandSource {
    fn next_command(&mut self) -> Option<Command>;
}

impl CommandSource for VecDeque<Command> {
    fn next_command(&mut self) -> Option<Command> {
        self.pop_front()
    }
}

/// Lines from stdin, read on a background task. End of input becomes [`Command::Quit`].
pub struct StdinCommands {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl StdinCommands {
    /// Needs a running tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(cmd) = parse(&line) {
                            if tx.send(cmd).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
            let _ = tx.send(Command::Quit);
        });
        Self { rx }
    }
}

impl CommandSource for StdinCommands {
    fn next_command(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_grammar() {
        assert_eq!(parse(">bob"), Some(Command::Invite("bob".into())));
        assert_eq!(parse("> bob "), Some(Command::Invite("bob".into())));
        assert_eq!(parse("<alice"), Some(Command::Accept("alice".into())));
        assert_eq!(parse(">"), Some(Command::ListMembers));
        assert_eq!(parse("<"), Some(Command::ListPending));
        assert_eq!(parse("."), Some(Command::Leave));
        assert_eq!(parse("*"), Some(Command::ShowDirectory));
        assert_eq!(parse("?"), Some(Command::Help));
        assert_eq!(parse("help"), Some(Command::Help));
        assert_eq!(parse("hello there"), Some(Command::Say("hello there".into())));
        assert_eq!(parse("   "), None);
    }

    #[test]
    fn quit_words() {
        for w in ["bye", "exit", "quit", "stop", " stop "] {
            assert_eq!(parse(w), Some(Command::Quit));
        }
        assert_eq!(parse("stop it"), Some(Command::Say("stop it".into())));
    }

    #[test]
    fn text_keeps_inner_spacing() {
        assert_eq!(parse("  hi  there\r\n"), Some(Command::Say("  hi  there".into())));
    }

    #[test]
    fn queue_source_yields_in_order() {
        let mut q: VecDeque<Command> = [Command::Leave, Command::Quit].into_iter().collect();
        assert_eq!(q.next_command(), Some(Command::Leave));
        assert_eq!(q.next_command(), Some(Command::Quit));
        assert_eq!(q.next_command(), None);
    }
}
