// ABOUTME: Error types and the diagnostics sink threaded through a single run

use std::fmt;

use crate::token::{Token, TokenKind};

/// Formats the shared `line <N>: location: <msg>` tail used by every
/// reported error, independent of which stage produced it.
fn report(line: usize, location: &str, message: &str) -> String {
    if location.is_empty() {
        format!("line {}: {}", line, message)
    } else {
        format!("line {}: {}: {}", line, location, message)
    }
}

fn token_location(token: &Token) -> String {
    if token.kind == TokenKind::Eof {
        "at end".to_string()
    } else {
        format!("at '{}'", token.lexeme)
    }
}

/// A syntax error raised during parsing. Carries the formatted message only
/// — synchronization happens by returning control to the statement loop, not
/// via unwinding, since Rust has no exception mechanism to mirror the
/// original's `ParseError`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ParseError(pub String);

impl ParseError {
    pub fn at(token: &Token, message: impl Into<String>) -> Self {
        ParseError(report(token.line, &token_location(token), &message.into()))
    }
}

/// A runtime error, surfaced from deep inside evaluation. Carries the token
/// whose use triggered the error so the REPL/CLI can format it consistently.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", report(.token.line, &token_location(.token), .message))]
pub struct RuntimeError {
    pub token: Token,
    pub message: String,
}

impl RuntimeError {
    pub fn new(token: Token, message: impl Into<String>) -> Self {
        RuntimeError { token, message: message.into() }
    }
}

/// Accumulates scan/parse-time errors for one run and tracks whether
/// execution should proceed. Replaces the original's process-wide
/// `hadError`/`hadRuntimeError` statics with a value threaded explicitly
/// through scan/parse/resolve/run, so a REPL session can reset it between
/// lines without any global state.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub had_error: bool,
    pub had_runtime_error: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn error(&mut self, line: usize, message: String) {
        self.report(line, "", &message);
    }

    pub fn error_at(&mut self, token: &Token, message: &str) {
        self.report(token.line, &token_location(token), message);
    }

    /// A non-fatal static diagnostic (unused-variable notices) — printed,
    /// but does not set `had_error`, so it never blocks evaluation.
    pub fn warn(&mut self, line: usize, message: &str) {
        eprintln!("{}", report(line, "", message));
    }

    pub fn error_parse(&mut self, err: &ParseError) {
        eprintln!("{}", err.0);
        self.had_error = true;
    }

    fn report(&mut self, line: usize, location: &str, message: &str) {
        eprintln!("{}", report(line, location, message));
        self.had_error = true;
    }

    pub fn runtime_error(&mut self, err: &RuntimeError) {
        eprintln!("{}", err);
        self.had_runtime_error = true;
    }

    /// Resets the per-line error flag a REPL loop clears between inputs;
    /// `had_runtime_error` survives, matching the original's asymmetry.
    pub fn reset_had_error(&mut self) {
        self.had_error = false;
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "had_error={} had_runtime_error={}", self.had_error, self.had_runtime_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Literal;

    #[test]
    fn error_sets_had_error() {
        let mut diag = Diagnostics::new();
        assert!(!diag.had_error);
        diag.error(1, "boom".into());
        assert!(diag.had_error);
    }

    #[test]
    fn reset_had_error_leaves_runtime_error_flag_alone() {
        let mut diag = Diagnostics::new();
        diag.had_error = true;
        diag.had_runtime_error = true;
        diag.reset_had_error();
        assert!(!diag.had_error);
        assert!(diag.had_runtime_error);
    }

    #[test]
    fn eof_token_location_says_at_end() {
        let token = Token::new(TokenKind::Eof, "", Literal::None, 3);
        let err = ParseError::at(&token, "expected expression");
        assert_eq!(err.0, "line 3: at end: expected expression");
    }

    #[test]
    fn non_eof_token_location_quotes_lexeme() {
        let token = Token::new(TokenKind::Identifier, "x", Literal::None, 5);
        let err = ParseError::at(&token, "expected ';'");
        assert_eq!(err.0, "line 5: at 'x': expected ';'");
    }
}
