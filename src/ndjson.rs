//! Newline-delimited JSON driver.
//
//  Incremental splitter with a carry-over buffer for partial lines; each
//  complete line gets a fresh engine so offsets in per-line errors are
//  relative to the line start. In skip-errors mode a failing line is
//  surfaced to the error callback and the stream keeps going; otherwise
//  the first failure terminates with the 1-based line number attached.

use std::sync::Arc;

use log::debug;

use crate::engine::{Options, Projector};
use crate::error::SiftError;
use crate::query::parse_query;
use crate::selection::SelectionNode;
use crate::sink::CollectSink;
use crate::value::JsonValue;

pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct NdjsonOptions {
    pub skip_errors: bool,
    pub max_line_length: usize,
    pub engine: Options,
}

impl Default for NdjsonOptions {
    fn default() -> Self {
        NdjsonOptions {
            skip_errors: false,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            engine: Options::default(),
        }
    }
}

/// One failed line, delivered to the error callback in skip-errors mode.
#[derive(Debug, Clone)]
pub struct LineError {
    /// 1-based line number.
    pub line: u64,
    /// Original line content, truncated to the line length cap.
    pub content: String,
    pub error: SiftError,
}

pub struct NdjsonDriver {
    selection: Arc<SelectionNode>,
    opts: NdjsonOptions,
    partial: Vec<u8>,
    lines_done: u64,
    discarding: bool,
}

impl NdjsonDriver {
    pub fn new(selection: Arc<SelectionNode>, opts: NdjsonOptions) -> NdjsonDriver {
        NdjsonDriver {
            selection,
            opts,
            partial: Vec::new(),
            lines_done: 0,
            discarding: false,
        }
    }

    pub fn from_query(query: &str, opts: NdjsonOptions) -> Result<NdjsonDriver, SiftError> {
        Ok(NdjsonDriver::new(Arc::new(parse_query(query)?), opts))
    }

    /// Feed the next chunk, invoking `on_match` per successful line and
    /// `on_error` per failed line (skip-errors mode only).
    pub fn push<M, E>(
        &mut self,
        chunk: &[u8],
        on_match: &mut M,
        on_error: &mut E,
    ) -> Result<(), SiftError>
    where
        M: FnMut(JsonValue),
        E: FnMut(LineError),
    {
        let mut rest = chunk;
        while let Some(nl) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(nl);
            rest = &tail[1..];
            self.lines_done += 1;
            if self.discarding {
                // Tail of an oversize line; drop it and resume.
                self.discarding = false;
                continue;
            }
            if self.partial.len() + head.len() > self.opts.max_line_length {
                self.over_limit(self.lines_done, on_error)?;
                self.partial.clear();
                continue;
            }
            if self.partial.is_empty() {
                self.run_line(head, self.lines_done, on_match, on_error)?;
            } else {
                self.partial.extend_from_slice(head);
                let line = std::mem::take(&mut self.partial);
                self.run_line(&line, self.lines_done, on_match, on_error)?;
            }
        }
        if !rest.is_empty() && !self.discarding {
            if self.partial.len() + rest.len() > self.opts.max_line_length {
                self.over_limit(self.lines_done + 1, on_error)?;
                self.partial.clear();
                self.discarding = true;
            } else {
                self.partial.extend_from_slice(rest);
            }
        }
        Ok(())
    }

    /// End of input: a trailing unterminated line is processed as the
    /// final line.
    pub fn finish<M, E>(&mut self, on_match: &mut M, on_error: &mut E) -> Result<(), SiftError>
    where
        M: FnMut(JsonValue),
        E: FnMut(LineError),
    {
        if self.discarding {
            self.discarding = false;
            self.partial.clear();
            return Ok(());
        }
        if self.partial.is_empty() {
            return Ok(());
        }
        self.lines_done += 1;
        let line = std::mem::take(&mut self.partial);
        self.run_line(&line, self.lines_done, on_match, on_error)
    }

    /// Lines processed so far (1-based numbering).
    pub fn lines_done(&self) -> u64 {
        self.lines_done
    }

    fn over_limit<E>(&self, line: u64, on_error: &mut E) -> Result<(), SiftError>
    where
        E: FnMut(LineError),
    {
        let err = SiftError::LineTooLong {
            line,
            limit: self.opts.max_line_length,
        };
        if self.opts.skip_errors {
            debug!("dropping oversize line {}", line);
            on_error(LineError {
                line,
                content: String::new(),
                error: err,
            });
            Ok(())
        } else {
            Err(err)
        }
    }

    fn run_line<M, E>(
        &self,
        line: &[u8],
        line_no: u64,
        on_match: &mut M,
        on_error: &mut E,
    ) -> Result<(), SiftError>
    where
        M: FnMut(JsonValue),
        E: FnMut(LineError),
    {
        let line = trim_line(line);
        if line.is_empty() {
            return Ok(());
        }
        let mut projector = Projector::new(
            self.selection.clone(),
            CollectSink::default(),
            self.opts.engine.clone(),
        );
        match projector.execute(line) {
            Ok(()) => {
                if let Some(value) = projector.take_result() {
                    on_match(value);
                }
                Ok(())
            }
            Err(error) => {
                if self.opts.skip_errors {
                    debug!("line {} failed: {}", line_no, error);
                    let cap = self.opts.max_line_length.min(line.len());
                    on_error(LineError {
                        line: line_no,
                        content: String::from_utf8_lossy(&line[..cap]).into_owned(),
                        error,
                    });
                    Ok(())
                } else {
                    Err(error.at_line(line_no))
                }
            }
        }
    }
}

fn trim_line(mut line: &[u8]) -> &[u8] {
    while matches!(line.last(), Some(&(b'\r' | b' ' | b'\t'))) {
        line = &line[..line.len() - 1];
    }
    while matches!(line.first(), Some(&(b' ' | b'\t'))) {
        line = &line[1..];
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(
        input: &[&[u8]],
        opts: NdjsonOptions,
    ) -> Result<(Vec<JsonValue>, Vec<LineError>), SiftError> {
        let mut driver = NdjsonDriver::from_query("{ id }", opts)?;
        let mut matches = Vec::new();
        let mut errors = Vec::new();
        let mut on_match = |v: JsonValue| matches.push(v);
        let mut on_error = |e: LineError| errors.push(e);
        for chunk in input {
            driver.push(chunk, &mut on_match, &mut on_error)?;
        }
        driver.finish(&mut on_match, &mut on_error)?;
        Ok((matches, errors))
    }

    #[test]
    fn each_line_is_its_own_document() {
        let (matches, errors) = drive(
            &[b"{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n"],
            NdjsonOptions::default(),
        )
        .unwrap();
        assert!(errors.is_empty());
        let got: Vec<String> = matches.iter().map(|v| v.to_compact_string()).collect();
        assert_eq!(got, vec![r#"{"id":1}"#, r#"{"id":2}"#, r#"{"id":3}"#]);
    }

    #[test]
    fn lines_split_across_chunks() {
        let (matches, _) = drive(
            &[b"{\"id\"", b":1}\n{\"id\":2", b"}\n"],
            NdjsonOptions::default(),
        )
        .unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn trailing_line_without_newline() {
        let (matches, _) = drive(&[b"{\"id\":1}\n{\"id\":2}"], NdjsonOptions::default()).unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn blank_lines_and_crlf_are_tolerated() {
        let (matches, errors) = drive(
            &[b"{\"id\":1}\r\n\r\n{\"id\":2}\r\n"],
            NdjsonOptions::default(),
        )
        .unwrap();
        assert!(errors.is_empty());
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn skip_errors_surfaces_line_and_offset() {
        let (matches, errors) = drive(
            &[b"{\"id\":1}\n{\"id\":truX}\n"],
            NdjsonOptions {
                skip_errors: true,
                ..NdjsonOptions::default()
            },
        )
        .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].to_compact_string(), r#"{"id":1}"#);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 2);
        assert_eq!(errors[0].content, r#"{"id":truX}"#);
        // Offset points at the `t` of `truX`, relative to the line.
        assert_eq!(errors[0].error.offset(), Some(6));
        assert_eq!(errors[0].error.code(), "ERR_INVALID_LITERAL");
    }

    #[test]
    fn hard_mode_stops_with_line_number() {
        let err = drive(&[b"{\"id\":1}\n{\"id\":truX}\n"], NdjsonOptions::default()).unwrap_err();
        match err {
            SiftError::AtLine { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn oversize_line_is_dropped_in_skip_mode() {
        let long = format!("{{\"id\":\"{}\"}}\n", "x".repeat(64));
        let input = format!("{}{{\"id\":2}}\n", long);
        let (matches, errors) = drive(
            &[input.as_bytes()],
            NdjsonOptions {
                skip_errors: true,
                max_line_length: 32,
                ..NdjsonOptions::default()
            },
        )
        .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].to_compact_string(), r#"{"id":2}"#);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error.code(), "ERR_LINE_TOO_LONG");
    }

    #[test]
    fn oversize_line_is_fatal_otherwise() {
        let long = format!("{{\"id\":\"{}\"}}\n", "x".repeat(64));
        let err = drive(
            &[long.as_bytes()],
            NdjsonOptions {
                max_line_length: 32,
                ..NdjsonOptions::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), "ERR_LINE_TOO_LONG");
    }

    #[test]
    fn oversize_partial_without_newline_is_caught_early() {
        let mut driver = NdjsonDriver::from_query(
            "{ id }",
            NdjsonOptions {
                skip_errors: true,
                max_line_length: 8,
                ..NdjsonOptions::default()
            },
        )
        .unwrap();
        let mut matches = Vec::new();
        let mut errors = Vec::new();
        let mut on_match = |v: JsonValue| matches.push(v);
        let mut on_error = |e: LineError| errors.push(e);
        driver
            .push(b"{\"id\":\"aaaaaaaaaa", &mut on_match, &mut on_error)
            .unwrap();
        driver
            .push(b"aaaa\"}\n{\"id\":5}\n", &mut on_match, &mut on_error)
            .unwrap();
        driver.finish(&mut on_match, &mut on_error).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].to_compact_string(), r#"{"id":5}"#);
    }
}
