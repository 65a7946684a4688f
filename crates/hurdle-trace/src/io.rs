//! Per-run console streams.
//!
//! A traced program reads `input()` and `sys.stdin` from a buffer seeded with
//! the run's input string and writes `print()` and `sys.stdout` into a
//! capture buffer. Both live in the interpreter, never in the host process.

use std::ops::{Deref, DerefMut};

use crate::interpreter::Interpreter;

/// The stdin reader and stdout buffer of one interpreter.
#[derive(Debug, Default)]
pub struct Streams {
    input: String,
    cursor: usize,
    output: String,
}

impl Streams {
    pub fn with_input(input: &str) -> Self {
        Streams {
            input: input.to_string(),
            ..Streams::default()
        }
    }

    /// Next line including its newline, or `None` at end of input.
    pub fn read_line(&mut self) -> Option<String> {
        let rest = &self.input[self.cursor..];
        if rest.is_empty() {
            return None;
        }
        let end = rest.find('\n').map_or(rest.len(), |i| i + 1);
        self.cursor += end;
        Some(rest[..end].to_string())
    }

    /// Everything not read yet.
    pub fn read_rest(&mut self) -> String {
        let rest = self.input[self.cursor..].to_string();
        self.cursor = self.input.len();
        rest
    }

    pub fn write(&mut self, text: &str) {
        self.output.push_str(text);
    }

    pub fn output_len(&self) -> usize {
        self.output.len()
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

/// Keeps substituted streams on an interpreter for the guard's lifetime and
/// puts the previous ones back on drop.
pub struct StreamGuard<'a, 'h> {
    interp: &'a mut Interpreter<'h>,
    saved: Option<Streams>,
}

impl<'a, 'h> StreamGuard<'a, 'h> {
    pub fn install(interp: &'a mut Interpreter<'h>, streams: Streams) -> Self {
        let saved = std::mem::replace(&mut interp.streams, streams);
        StreamGuard {
            interp,
            saved: Some(saved),
        }
    }
}

impl<'h> Deref for StreamGuard<'_, 'h> {
    type Target = Interpreter<'h>;

    fn deref(&self) -> &Self::Target {
        self.interp
    }
}

impl<'h> DerefMut for StreamGuard<'_, 'h> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.interp
    }
}

impl Drop for StreamGuard<'_, '_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.interp.streams = saved;
        }
    }
}

/// Runs `body` with stdin seeded from `input` and stdout captured, returning
/// the body's result and everything it printed.
pub fn with_isolated_streams<'h, T>(
    interp: &mut Interpreter<'h>,
    input: &str,
    body: impl FnOnce(&mut Interpreter<'h>) -> T,
) -> (T, String) {
    let mut guard = StreamGuard::install(interp, Streams::with_input(input));
    let result = body(&mut guard);
    let captured = guard.streams.take_output();
    (result, captured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::InterpreterConfig;

    #[test]
    fn lines_keep_their_newlines() {
        let mut streams = Streams::with_input("a\nb\nc");
        assert_eq!(streams.read_line().as_deref(), Some("a\n"));
        assert_eq!(streams.read_rest(), "b\nc");
        assert_eq!(streams.read_line(), None);
    }

    #[test]
    fn streams_are_restored_after_the_body() {
        let mut interp = Interpreter::new(InterpreterConfig::default());
        interp.streams.write("outer");
        let (line, captured) = with_isolated_streams(&mut interp, "42\n", |interp| {
            interp.streams.write("inner");
            interp.streams.read_line()
        });
        assert_eq!(line.as_deref(), Some("42\n"));
        assert_eq!(captured, "inner");
        assert_eq!(interp.streams.take_output(), "outer");
    }

    #[test]
    fn streams_are_restored_on_panic() {
        let mut interp = Interpreter::new(InterpreterConfig::default());
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            with_isolated_streams(&mut interp, "x", |interp| {
                interp.streams.write("lost");
                panic!("boom");
            })
        }));
        assert!(outcome.is_err());
        assert_eq!(interp.streams.output_len(), 0);
        assert_eq!(interp.streams.read_line(), None);
    }
}
