//! Scan command model
//!
//! A [`Command`] is the tokenized form of one scanner invocation. Tokens that
//! begin with `-` are flags, the token after an argument-taking flag is that
//! flag's value, and every other token is a scan target.
//!
//! Commands are never edited in place. Every repair produces a new token
//! list which is joined and re-parsed via [`Command::from_tokens`], so a
//! repaired command is always as well-formed as a freshly generated one.

use serde::Serialize;
use std::borrow::Cow;

/// The only program a scan command may invoke.
pub const SCANNER_PROGRAM: &str = "nmap";

/// Flags whose value is the following token.
///
/// `-p` and `--script` are the ones generators actually emit. The rest keep
/// output paths and tuning values from being mistaken for targets.
pub const ARGUMENT_FLAGS: &[&str] = &[
    "-p",
    "--ports",
    "--script",
    "--script-args",
    "-oA",
    "-oN",
    "-oX",
    "-oG",
    "--top-ports",
    "--exclude",
    "--exclude-ports",
    "--host-timeout",
    "--max-retries",
    "--min-rate",
    "--max-rate",
    "--version-intensity",
    "--stylesheet",
    "-iL",
    "-e",
];

/// Returns true when `flag` consumes the next token as its value.
pub fn takes_argument(flag: &str) -> bool {
    ARGUMENT_FLAGS.contains(&flag)
}

/// Why a command line could not be tokenized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unbalanced quoting in command: {0}")]
    UnbalancedQuoting(String),
    #[error("command cannot be rendered: {0}")]
    Unrenderable(String),
}

/// A tokenized scan command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    /// Canonical text of the command.
    pub raw: String,
    /// First token (expected to be the scanner program).
    pub program: String,
    /// Flag tokens in order of appearance.
    pub flags: Vec<String>,
    /// Target tokens in order of appearance.
    pub targets: Vec<String>,
    #[serde(skip)]
    tokens: Vec<String>,
}

impl Command {
    /// Tokenize a command line with shell quoting rules.
    pub fn parse(raw: &str) -> Result<Self, CommandParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CommandParseError::Empty);
        }
        let tokens = shlex::split(trimmed)
            .ok_or_else(|| CommandParseError::UnbalancedQuoting(trimmed.to_string()))?;
        if tokens.is_empty() {
            return Err(CommandParseError::Empty);
        }

        let mut flags = Vec::new();
        let mut targets = Vec::new();
        let mut iter = tokens.iter().skip(1).peekable();
        while let Some(token) = iter.next() {
            if token.starts_with('-') {
                flags.push(token.clone());
                if takes_argument(token) {
                    // A dangling argument flag leaves the next flag intact.
                    if iter.peek().is_some_and(|next| !next.starts_with('-')) {
                        iter.next();
                    }
                }
            } else {
                targets.push(token.clone());
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            program: tokens[0].clone(),
            flags,
            targets,
            tokens,
        })
    }

    /// Join tokens with shell quoting and parse the result.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Self, CommandParseError> {
        let rendered = tokens
            .iter()
            .map(|t| render_token(t.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::parse(&rendered.join(" "))
    }

    /// All tokens including the program.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// True when the exact flag token is present.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Value of an argument-taking flag, accepting both `--flag value` and
    /// `--flag=value` forms.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        let prefix = format!("{}=", flag);
        let mut iter = self.tokens.iter().skip(1);
        while let Some(token) = iter.next() {
            if token == flag {
                return iter.next().map(String::as_str).filter(|v| !v.starts_with('-'));
            }
            if let Some(value) = token.strip_prefix(&prefix) {
                return Some(value);
            }
        }
        None
    }

    /// Port specification, from `-p <spec>`, `-p<spec>` or `--ports <spec>`.
    ///
    /// `-p-` is the all-ports shorthand and is returned as `-`.
    pub fn port_spec(&self) -> Option<&str> {
        if let Some(spec) = self.flag_value("-p").or_else(|| self.flag_value("--ports")) {
            return Some(spec);
        }
        self.tokens
            .iter()
            .skip(1)
            .find_map(|t| t.strip_prefix("-p").filter(|rest| !rest.is_empty()))
    }

    /// Script selection passed to `--script`.
    pub fn script_selection(&self) -> Option<&str> {
        self.flag_value("--script")
    }
}

/// Quote a token only when the shell would otherwise split or expand it.
fn render_token(token: &str) -> Result<Cow<'_, str>, CommandParseError> {
    let plain = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.,:/=+@%".contains(c));
    if plain {
        return Ok(Cow::Borrowed(token));
    }
    shlex::try_quote(token).map_err(|e| CommandParseError::Unrenderable(e.to_string()))
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}
