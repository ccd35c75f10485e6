//! Shell Safety: Command-Line Injection Screening
//!
//! Generated scan command lines arrive as free text. Before anything is
//! tokenized or scored, the text is screened for shell chaining and
//! redirection syntax. A command line that would do more than invoke the
//! scanner once is rejected outright.
//!
//! # Threat Model
//!
//! - **Chaining:** `;`, `&`, `|`, `&&`, `||` append a second program.
//! - **Substitution:** `` ` `` and `$(` run nested programs.
//! - **Redirection:** `<` and `>` read or clobber local files.
//! - **Line breaks:** a newline is a command separator for every shell.
//!
//! The sandbox launcher passes arguments directly to the container runtime
//! without a shell, so screening here is the only place chaining intent is
//! detected and reported back to the generator.

/// Multi-character sequences checked before the single characters so the
/// reported pattern is the most specific one.
const INJECTION_SEQUENCES: &[&str] = &["$(", "&&", "||"];

/// Characters that indicate chaining, substitution or redirection intent.
const INJECTION_CHARACTERS: &[char] = &[';', '&', '|', '`', '<', '>', '\n', '\r'];

/// A detected injection pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionMatch {
    /// The offending character or sequence.
    pub pattern: String,
    /// Byte offset in the input.
    pub position: usize,
    /// The original input (truncated to 100 chars).
    pub input_preview: String,
}

impl std::fmt::Display for InjectionMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "injection pattern '{}' at position {} in: {}",
            self.pattern.escape_default(),
            self.position,
            self.input_preview
        )
    }
}

impl std::error::Error for InjectionMatch {}

fn preview(input: &str) -> String {
    if input.chars().count() > 100 {
        let cut: String = input.chars().take(100).collect();
        format!("{}...", cut)
    } else {
        input.to_string()
    }
}

/// Screen a raw command line for injection syntax.
///
/// Returns the earliest match. When a sequence and a single character start
/// at the same offset the sequence wins (`&&` is reported, not `&`).
pub fn detect_injection(input: &str) -> Result<(), InjectionMatch> {
    let sequence_hit = INJECTION_SEQUENCES
        .iter()
        .filter_map(|seq| input.find(seq).map(|pos| (pos, seq.to_string())))
        .min_by_key(|(pos, _)| *pos);

    let char_hit = input
        .char_indices()
        .find(|(_, ch)| INJECTION_CHARACTERS.contains(ch))
        .map(|(pos, ch)| (pos, ch.to_string()));

    let hit = match (sequence_hit, char_hit) {
        (Some(seq), Some(ch)) if ch.0 < seq.0 => Some(ch),
        (Some(seq), _) => Some(seq),
        (None, ch) => ch,
    };

    match hit {
        Some((position, pattern)) => Err(InjectionMatch {
            pattern,
            position,
            input_preview: preview(input),
        }),
        None => Ok(()),
    }
}

/// Sanitize a string for use as a container name or file name component.
///
/// Replaces any character that is not alphanumeric, `-`, `_`, or `.` with `_`.
pub fn sanitize_identifier(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
