//! The built-in `.echo` command.
//!
//! Commands are split shell-style and parsed with clap, so `--help` and
//! argument errors come back as chat replies.

use async_trait::async_trait;
use clap::Parser;
use clap::error::ErrorKind;
use tracing::debug;

use island_runtime::{CommandContext, CommandProcessor};

/// Repeat the given text.
#[derive(Parser, Debug)]
#[command(name = "echo")]
struct EchoCommand {
    /// Words to send back.
    #[arg(required = true, num_args = 1..)]
    words: Vec<String>,
}

/// Answers `<prefix>echo <text>` with `<text>`; ignores everything else.
#[derive(Debug, Clone)]
pub struct EchoProcessor {
    prefix: String,
}

impl EchoProcessor {
    /// Creates a processor for commands starting with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl CommandProcessor for EchoProcessor {
    async fn process(&self, command: &str, ctx: &CommandContext) -> Option<String> {
        let body = command.strip_prefix(&self.prefix)?;
        let args = shell_split(body);
        if !args.first().is_some_and(|name| name.eq_ignore_ascii_case("echo")) {
            return None;
        }

        match EchoCommand::try_parse_from(&args) {
            Ok(cmd) => Some(cmd.words.join(" ")),
            Err(err) => {
                if err.kind() != ErrorKind::DisplayHelp {
                    debug!(session = %ctx.session, error = %err, "Bad echo arguments");
                }
                Some(err.to_string().trim_end().to_string())
            }
        }
    }
}

/// Splits `input` on unquoted whitespace.
///
/// Single and double quotes group words; inside double quotes a backslash
/// escapes the next character.
fn shell_split(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(open), c) if c == open => quote = None,
            (None, '"' | '\'') => quote = Some(ch),
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            (_, c) => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}
