//! Selection-driven pushdown automaton over the token stream.
//
//  Four parallel stacks (selection / result / kind / output key) replace a
//  pointer graph: depth is the shared length, the inner loop touches only
//  the stack it needs. While `skip` is active no stack is mutated — the
//  unselected subtree is consumed structurally and thrown away.

use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::trace;

use crate::budget::{Budget, CancelFlag, Control};
use crate::capture::RawCapture;
use crate::error::SiftError;
use crate::selection::SelectionNode;
use crate::sink::{Sink, Stats};
use crate::skip::{FanoutLimits, SkipState};
use crate::tokenizer::{Token, TokenKind, Tokenizer};
use crate::value::JsonValue;

/// Default window for `execute_chunked`.
pub const DEFAULT_WINDOW: usize = 64 * 1024;
/// Window floor; smaller requests are rounded up.
pub const MIN_WINDOW: usize = 4 * 1024;

/// Emission discipline, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitMode {
    /// Deliver each match as a materialized value.
    #[default]
    Object,
    /// Deliver the exact source bytes of each match; the materialized
    /// value is still built so the final result stays observable.
    Raw,
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub mode: EmitMode,
    pub budget: Budget,
    pub cancel: CancelFlag,
    pub fanout: Option<FanoutLimits>,
}

pub struct Projector<S: Sink> {
    root: Arc<SelectionNode>,
    sink: S,
    mode: EmitMode,
    budget: Budget,
    cancel: CancelFlag,
    ctl: Control,
    guard: Option<FanoutLimits>,

    lexer: Tokenizer,

    // Parallel stacks; equal length is the structural invariant.
    sel_stack: Vec<Arc<SelectionNode>>,
    out_stack: Vec<JsonValue>,
    kind_stack: Vec<bool>, // true = array
    key_stack: Vec<Option<String>>,

    pending_key: Option<String>,
    skip: SkipState,
    capture: RawCapture,

    matched: u64,
    processed: u64,
    skip_spent: Duration,

    result: Option<JsonValue>,
}

impl<S: Sink> Projector<S> {
    pub fn new(root: Arc<SelectionNode>, sink: S, opts: Options) -> Projector<S> {
        let ctl = Control::new(opts.budget.clone(), opts.cancel.clone());
        Projector {
            root,
            sink,
            mode: opts.mode,
            budget: opts.budget,
            cancel: opts.cancel,
            ctl,
            guard: opts.fanout,
            lexer: Tokenizer::new(),
            sel_stack: Vec::new(),
            out_stack: Vec::new(),
            kind_stack: Vec::new(),
            key_stack: Vec::new(),
            pending_key: None,
            skip: SkipState::default(),
            capture: RawCapture::default(),
            matched: 0,
            processed: 0,
            skip_spent: Duration::ZERO,
            result: None,
        }
    }

    /// Final output once the root structure has closed; after a controlled
    /// termination this is the last-known result.
    pub fn result(&self) -> Option<&JsonValue> {
        self.result.as_ref()
    }

    pub fn take_result(&mut self) -> Option<JsonValue> {
        self.result.take()
    }

    pub fn matched_count(&self) -> u64 {
        self.matched
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn stats(&self) -> Stats {
        let secs = self.ctl.elapsed().as_secs_f64();
        Stats {
            matched_count: self.matched,
            processed_bytes: self.processed,
            duration_ms: secs * 1000.0,
            throughput_mbps: if secs > 0.0 {
                self.processed as f64 / (1024.0 * 1024.0) / secs
            } else {
                0.0
            },
            skip_ratio: if secs > 0.0 {
                (self.skip_spent.as_secs_f64() / secs).min(1.0)
            } else {
                0.0
            },
        }
    }

    /// Restore construction state; the next chunk is position 0 again.
    pub fn reset(&mut self) {
        self.lexer.reset();
        self.sel_stack.clear();
        self.out_stack.clear();
        self.kind_stack.clear();
        self.key_stack.clear();
        self.pending_key = None;
        self.skip.clear();
        self.capture.reset();
        self.matched = 0;
        self.processed = 0;
        self.skip_spent = Duration::ZERO;
        self.result = None;
        self.ctl = Control::new(self.budget.clone(), self.cancel.clone());
    }

    /// Whole-buffer convenience.
    pub fn execute(&mut self, buf: &[u8]) -> Result<(), SiftError> {
        self.process_chunk(buf)?;
        self.finish()
    }

    /// Slice a single buffer into fixed windows. Exists so the skip
    /// sub-machine can be re-armed at window boundaries: a window that
    /// starts inside an unselected subtree is consumed by the byte scanner
    /// without entering the tokenizer at all. Results are identical to
    /// `execute` for every window size.
    pub fn execute_chunked(&mut self, buf: &[u8], window: usize) -> Result<(), SiftError> {
        let w = window.max(MIN_WINDOW);
        let mut off = 0;
        while off < buf.len() {
            let end = (off + w).min(buf.len());
            self.process_chunk(&buf[off..end])?;
            off = end;
        }
        self.finish()
    }

    /// Push the next contiguous chunk of the logical stream.
    pub fn process_chunk(&mut self, chunk: &[u8]) -> Result<(), SiftError> {
        let base = self.lexer.position();
        self.ctl.checkpoint(base)?;
        self.drive(chunk, base)?;
        if self.capture.is_active() {
            self.capture.retain(base, chunk);
        }
        self.processed = self.lexer.position();
        Ok(())
    }

    /// End of input: flush the tokenizer, deliver stats, signal drain.
    pub fn finish(&mut self) -> Result<(), SiftError> {
        self.ctl.checkpoint(self.lexer.position())?;
        let mut lexer = mem::take(&mut self.lexer);
        let base = lexer.position();
        let res = lexer.finish(|tok| self.on_token(tok, base, &[]));
        self.lexer = lexer;
        res?;
        let stats = self.stats();
        self.sink.on_stats(&stats);
        self.sink.on_drain();
        Ok(())
    }

    fn drive(&mut self, chunk: &[u8], base: u64) -> Result<(), SiftError> {
        let mut from = 0usize;
        // Byte fast path: an idle lexer inside an unselected subtree lets
        // the whole window prefix bypass lexing. Re-armed once per chunk.
        if self.skip.is_active() && self.lexer.is_idle() {
            let t0 = Instant::now();
            let out = self.skip.scan(chunk, base, &self.ctl, self.guard.as_ref())?;
            self.skip_spent += t0.elapsed();
            self.lexer.advance(out.consumed as u64);
            from = out.consumed;
            if out.closed {
                self.exit_skip(base + out.consumed as u64);
            }
        }
        if from < chunk.len() {
            let ctl = self.ctl.clone();
            let mut lexer = mem::take(&mut self.lexer);
            let res = lexer.feed(&chunk[from..], &ctl, |tok| self.on_token(tok, base, chunk));
            self.lexer = lexer;
            res?;
        }
        Ok(())
    }

    fn depth(&self) -> usize {
        self.out_stack.len()
    }

    fn on_token(&mut self, tok: &Token, chunk_base: u64, chunk: &[u8]) -> Result<(), SiftError> {
        if self.skip.is_active() {
            return self.on_skip_token(tok);
        }
        match tok.kind {
            TokenKind::LBrace => self.on_structure_start(false, tok),
            TokenKind::LBracket => self.on_structure_start(true, tok),
            TokenKind::RBrace | TokenKind::RBracket => {
                self.on_structure_end(tok, chunk_base, chunk)
            }
            TokenKind::Colon | TokenKind::Comma | TokenKind::Eof => Ok(()),
            TokenKind::Str
                if !self.out_stack.is_empty()
                    && !self.kind_stack.last().copied().unwrap_or(false)
                    && self.pending_key.is_none() =>
            {
                // Object context, no pending key: this string is the key.
                if let Some(s) = tok.str_value() {
                    self.pending_key = Some(s.to_string());
                }
                Ok(())
            }
            TokenKind::Str
            | TokenKind::Num
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Null => self.on_value(tok),
        }
    }

    /// Skip sub-machine: structural counting only, no stack mutation.
    /// Strings were still lexed, so braces inside them never reach here.
    fn on_skip_token(&mut self, tok: &Token) -> Result<(), SiftError> {
        match tok.kind {
            TokenKind::LBrace => self.skip.open(false, self.guard.as_ref(), tok.start),
            TokenKind::LBracket => self.skip.open(true, self.guard.as_ref(), tok.start),
            TokenKind::RBrace | TokenKind::RBracket => {
                if self.skip.close() {
                    self.exit_skip(tok.end);
                }
                Ok(())
            }
            TokenKind::Comma => self.skip.child(self.guard.as_ref(), tok.start),
            _ => Ok(()),
        }
    }

    fn exit_skip(&mut self, offset: u64) {
        trace!("skipped subtree ended at byte {}", offset);
        self.skip.clear();
        self.pending_key = None;
    }

    fn enter_skip(&mut self, is_array: bool, offset: u64) -> Result<(), SiftError> {
        trace!("entering skip mode at byte {}", offset);
        self.skip
            .enter(is_array, self.depth(), self.guard.as_ref(), offset)
    }

    fn push_frame(&mut self, sel: Arc<SelectionNode>, is_array: bool, out_key: Option<String>) {
        self.sel_stack.push(sel);
        self.out_stack.push(JsonValue::new_container(is_array));
        self.kind_stack.push(is_array);
        self.key_stack.push(out_key);
    }

    fn pop_frame(&mut self) -> Option<(Arc<SelectionNode>, JsonValue, bool, Option<String>)> {
        let sel = self.sel_stack.pop()?;
        let value = self.out_stack.pop()?;
        let is_array = self.kind_stack.pop()?;
        let key = self.key_stack.pop()?;
        Some((sel, value, is_array, key))
    }

    fn on_structure_start(&mut self, is_array: bool, tok: &Token) -> Result<(), SiftError> {
        if let Some(g) = &self.guard {
            g.check_depth(self.depth() + 1, tok.start)?;
        }
        if self.out_stack.is_empty() {
            // Root: a raw-mode root object is itself the single match.
            if self.mode == EmitMode::Raw && !is_array {
                self.capture.begin(tok.start);
            }
            let root = self.root.clone();
            self.push_frame(root, is_array, None);
        } else if self.kind_stack.last().copied().unwrap_or(false) {
            // Array parent: elements inherit the array's selection.
            let sel = match self.sel_stack.last() {
                Some(s) => s.clone(),
                None => return Ok(()),
            };
            if self.depth() == 1 && self.mode == EmitMode::Raw {
                // Top-level array element: an individual match.
                self.capture.begin(tok.start);
            }
            self.push_frame(sel, is_array, None);
        } else {
            // Object parent: resolve the pending key or skip the subtree.
            let resolved = match self.pending_key.take() {
                Some(key) => self
                    .sel_stack
                    .last()
                    .and_then(|sel| sel.child(&key))
                    .map(|node| {
                        let out_key = node.output_key(&key);
                        (node, out_key)
                    }),
                None => None,
            };
            match resolved {
                Some((node, out_key)) => self.push_frame(node, is_array, Some(out_key)),
                None => self.enter_skip(is_array, tok.start)?,
            }
        }
        self.pending_key = None;
        Ok(())
    }

    fn on_structure_end(
        &mut self,
        tok: &Token,
        chunk_base: u64,
        chunk: &[u8],
    ) -> Result<(), SiftError> {
        self.pending_key = None;
        let (sel, mut value, is_array, key) = match self.pop_frame() {
            Some(frame) => frame,
            // Stray close below the root, tolerated.
            None => return Ok(()),
        };

        // Missing-key defaults before the container is sealed.
        if !is_array {
            if let (JsonValue::Object(map), Some(children)) = (&mut value, sel.children()) {
                for (src_key, node) in children.iter() {
                    if node.has_default() {
                        let out_key = node.output_key(src_key);
                        if !map.contains_key(&out_key) {
                            map.insert(out_key, node.transform(JsonValue::Null));
                        }
                    }
                }
            }
        }

        if self.out_stack.is_empty() {
            // Root closed. A root object is the single emission; a root
            // array was emitted element by element already. The result is
            // stored first so a budget failure during the emission still
            // leaves it observable.
            let emitted = if !is_array {
                self.emit(&value, tok.end, chunk_base, chunk)
            } else {
                Ok(())
            };
            self.result = Some(value);
            return emitted;
        }

        let parent_is_array = self.kind_stack.last().copied().unwrap_or(false);
        if self.depth() == 1 && parent_is_array {
            self.emit(&value, tok.end, chunk_base, chunk)?;
        }

        match self.out_stack.last_mut() {
            Some(JsonValue::Array(arr)) => {
                if let Some(g) = &self.guard {
                    g.check_width(true, arr.len() as u64 + 1, tok.end)?;
                }
                arr.push(value);
            }
            Some(JsonValue::Object(map)) => {
                let out_key = match key {
                    Some(k) => k,
                    None => {
                        return Err(SiftError::StructuralMismatch {
                            expected: "object key for attachment",
                            offset: tok.end,
                        })
                    }
                };
                if let Some(g) = &self.guard {
                    g.check_width(false, map.len() as u64 + 1, tok.end)?;
                }
                map.insert(out_key, value);
            }
            _ => {
                return Err(SiftError::StructuralMismatch {
                    expected: "container",
                    offset: tok.end,
                })
            }
        }
        Ok(())
    }

    fn on_value(&mut self, tok: &Token) -> Result<(), SiftError> {
        if self.out_stack.is_empty() {
            // Bare scalar at the root; nothing to attach it to.
            return Ok(());
        }
        let parent_is_array = self.kind_stack.last().copied().unwrap_or(false);
        if parent_is_array {
            let sel = match self.sel_stack.last() {
                Some(s) => s.clone(),
                None => return Ok(()),
            };
            if sel.permits_elements() {
                let v = sel.transform(token_value(tok));
                match self.out_stack.last_mut() {
                    Some(JsonValue::Array(arr)) => {
                        if let Some(g) = &self.guard {
                            g.check_width(true, arr.len() as u64 + 1, tok.start)?;
                        }
                        arr.push(v);
                    }
                    _ => {
                        return Err(SiftError::StructuralMismatch {
                            expected: "array",
                            offset: tok.start,
                        })
                    }
                }
            }
        } else if let Some(key) = self.pending_key.take() {
            if let Some(node) = self.sel_stack.last().and_then(|sel| sel.child(&key)) {
                let out_key = node.output_key(&key);
                let v = node.transform(token_value(tok));
                match self.out_stack.last_mut() {
                    Some(JsonValue::Object(map)) => {
                        if let Some(g) = &self.guard {
                            g.check_width(false, map.len() as u64 + 1, tok.start)?;
                        }
                        map.insert(out_key, v);
                    }
                    _ => {
                        return Err(SiftError::StructuralMismatch {
                            expected: "object",
                            offset: tok.start,
                        })
                    }
                }
            }
            // Unselected key: value silently discarded.
        }
        self.pending_key = None;
        Ok(())
    }

    fn emit(
        &mut self,
        value: &JsonValue,
        end: u64,
        chunk_base: u64,
        chunk: &[u8],
    ) -> Result<(), SiftError> {
        self.ctl.checkpoint(end)?;
        self.matched += 1;
        self.ctl.check_matches(self.matched, end)?;
        trace!("match #{} complete at byte {}", self.matched, end);
        match self.mode {
            EmitMode::Object => self.sink.on_match(value),
            EmitMode::Raw => {
                let bytes = self.capture.take(end, chunk_base, chunk);
                self.sink.on_raw_match(&bytes);
            }
        }
        Ok(())
    }
}

fn token_value(tok: &Token) -> JsonValue {
    match tok.kind {
        TokenKind::Str => match tok.str_value() {
            Some(s) => JsonValue::String(s.to_string()),
            None => JsonValue::Null,
        },
        TokenKind::Num => match tok.num_value() {
            Some(n) => JsonValue::Number(n),
            None => JsonValue::Null,
        },
        TokenKind::True => JsonValue::Boolean(true),
        TokenKind::False => JsonValue::Boolean(false),
        _ => JsonValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_query;
    use crate::sink::CollectSink;

    fn run(query: &str, input: &[u8]) -> (Option<JsonValue>, CollectSink) {
        run_opts(query, input, Options::default()).expect("projection failed")
    }

    fn run_opts(
        query: &str,
        input: &[u8],
        opts: Options,
    ) -> Result<(Option<JsonValue>, CollectSink), SiftError> {
        let sel = Arc::new(parse_query(query)?);
        let mut p = Projector::new(sel, CollectSink::default(), opts);
        p.execute(input)?;
        let result = p.take_result();
        Ok((result, p.into_sink()))
    }

    fn compact(v: &Option<JsonValue>) -> String {
        v.as_ref().map(|v| v.to_compact_string()).unwrap_or_default()
    }

    #[test]
    fn flat_selection() {
        let (result, sink) = run(
            "{ id, name, email }",
            br#"{"id":1,"name":"Leanne Graham","email":"e@x","phone":"123"}"#,
        );
        assert_eq!(
            compact(&result),
            r#"{"id":1,"name":"Leanne Graham","email":"e@x"}"#
        );
        // Root object: exactly one emission.
        assert_eq!(sink.matches.len(), 1);
        assert!(sink.drained);
    }

    #[test]
    fn nested_selection() {
        let (result, _) = run("{ a { b { c } } }", br#"{"a":{"b":{"c":1}}}"#);
        assert_eq!(compact(&result), r#"{"a":{"b":{"c":1}}}"#);
    }

    #[test]
    fn array_elements_emit_individually() {
        let (result, sink) = run(
            "{ name }",
            br#"[{"id":1,"name":"A","active":true},{"id":2,"name":"B","active":false}]"#,
        );
        assert_eq!(compact(&result), r#"[{"name":"A"},{"name":"B"}]"#);
        assert_eq!(sink.matches.len(), 2);
        assert_eq!(sink.matches[0].to_compact_string(), r#"{"name":"A"}"#);
    }

    #[test]
    fn alias_and_coerce() {
        let (result, _) = run(
            r#"{ first: firstName, age @coerce(type:"number") }"#,
            br#"{"firstName":"Leanne","age":"25"}"#,
        );
        assert_eq!(compact(&result), r#"{"first":"Leanne","age":25}"#);
    }

    #[test]
    fn substring_directive() {
        let (result, _) = run(
            r#"{ bio: biography @substring(start:0, len:10) }"#,
            br#"{"biography":"Full-stack developer from Gwenborough"}"#,
        );
        assert_eq!(compact(&result), r#"{"bio":"Full-stack"}"#);
    }

    #[test]
    fn default_synthesizes_missing_key() {
        let (result, _) = run(r#"{ missing @default(value:"N/A") }"#, br#"{}"#);
        assert_eq!(compact(&result), r#"{"missing":"N/A"}"#);
    }

    #[test]
    fn default_replaces_explicit_null() {
        let (result, _) = run(
            r#"{ v @default(value:0) }"#,
            br#"{"v":null}"#,
        );
        assert_eq!(compact(&result), r#"{"v":0}"#);
    }

    #[test]
    fn unselected_subtrees_are_skipped() {
        let (result, _) = run(
            "{ keep }",
            br#"{"drop":{"deep":[{"x":"}]} haha"},{"y":2}]},"keep":1}"#,
        );
        assert_eq!(compact(&result), r#"{"keep":1}"#);
    }

    #[test]
    fn leaf_selection_keeps_scalar_arrays() {
        let (result, _) = run("{ tags }", br#"{"tags":["a","b"],"other":1}"#);
        assert_eq!(compact(&result), r#"{"tags":["a","b"]}"#);
    }

    #[test]
    fn garbage_between_tokens() {
        let (result, _) = run("{ a }", br#"{"a": !!! 1}"#);
        assert_eq!(compact(&result), r#"{"a":1}"#);
    }

    #[test]
    fn unclosed_string_at_eof() {
        let sel = Arc::new(parse_query("{ a, b }").unwrap());
        let mut p = Projector::new(sel, CollectSink::default(), Options::default());
        p.process_chunk(br#"[{"a":1},{"a":2,"b":"unterminated"#).unwrap();
        p.finish().unwrap();
        // No emission for the broken element; the prior one survives.
        assert_eq!(p.sink().matches.len(), 1);
        assert_eq!(p.sink().matches[0].to_compact_string(), r#"{"a":1}"#);
        assert!(p.result().is_none());
    }

    #[test]
    fn chunk_boundaries_do_not_change_output() {
        let input = br#"{"a":{"b":{"c":"x\ny"}},"skipme":[1,2,{"d":"}"}],"n":12.5}"#;
        let (whole, _) = run("{ a { b { c } }, n }", input);
        for chunk_size in 1..input.len() {
            let sel = Arc::new(parse_query("{ a { b { c } }, n }").unwrap());
            let mut p = Projector::new(sel, CollectSink::default(), Options::default());
            for chunk in input.chunks(chunk_size) {
                p.process_chunk(chunk).unwrap();
            }
            p.finish().unwrap();
            assert_eq!(p.take_result(), whole, "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn execute_chunked_matches_execute() {
        // Large skipped payload so the byte fast path actually engages.
        let blob = "z".repeat(40 * 1024);
        let input = format!(
            r#"{{"keep":"yes","skip":{{"blob":"{}","n":[1,2,3]}},"tail":7}}"#,
            blob
        );
        let (whole, _) = run("{ keep, tail }", input.as_bytes());
        let sel = Arc::new(parse_query("{ keep, tail }").unwrap());
        let mut p = Projector::new(sel, CollectSink::default(), Options::default());
        p.execute_chunked(input.as_bytes(), MIN_WINDOW).unwrap();
        assert_eq!(p.take_result(), whole);
    }

    #[test]
    fn raw_mode_array_elements() {
        let input = br#"[{"id":1, "x":[]},{"id":2}]"#;
        let sel = Arc::new(parse_query("{ id }").unwrap());
        let mut p = Projector::new(
            sel,
            CollectSink::default(),
            Options {
                mode: EmitMode::Raw,
                ..Options::default()
            },
        );
        p.execute(input).unwrap();
        let sink = p.into_sink();
        assert_eq!(sink.raw.len(), 2);
        assert_eq!(sink.raw[0], br#"{"id":1, "x":[]}"#.to_vec());
        assert_eq!(sink.raw[1], br#"{"id":2}"#.to_vec());
    }

    #[test]
    fn raw_mode_spans_chunk_boundaries() {
        let input: &[u8] = br#"[{"id":1,"pad":"xxxxxxxx"},{"id":2}]"#;
        let sel = Arc::new(parse_query("{ id }").unwrap());
        let mut p = Projector::new(
            sel,
            CollectSink::default(),
            Options {
                mode: EmitMode::Raw,
                ..Options::default()
            },
        );
        for chunk in input.chunks(3) {
            p.process_chunk(chunk).unwrap();
        }
        p.finish().unwrap();
        let sink = p.into_sink();
        assert_eq!(sink.raw[0], br#"{"id":1,"pad":"xxxxxxxx"}"#.to_vec());
        assert_eq!(sink.raw[1], br#"{"id":2}"#.to_vec());
    }

    #[test]
    fn raw_mode_root_object_is_one_span() {
        let input = br#" {"a":1,"b":{"c":2}} "#;
        let sel = Arc::new(parse_query("{ a }").unwrap());
        let mut p = Projector::new(
            sel,
            CollectSink::default(),
            Options {
                mode: EmitMode::Raw,
                ..Options::default()
            },
        );
        p.execute(input).unwrap();
        let sink = p.sink();
        assert_eq!(sink.raw.len(), 1);
        assert_eq!(sink.raw[0], br#"{"a":1,"b":{"c":2}}"#.to_vec());
        // The materialized result is still observable.
        assert_eq!(
            p.result().map(|v| v.to_compact_string()),
            Some(r#"{"a":1}"#.to_string())
        );
    }

    #[test]
    fn match_budget_is_a_strict_prefix() {
        let input = br#"[{"id":1},{"id":2},{"id":3},{"id":4}]"#;
        let opts = Options {
            budget: Budget {
                max_matches: Some(2),
                ..Budget::default()
            },
            ..Options::default()
        };
        let err = run_opts("{ id }", input, opts).unwrap_err();
        assert_eq!(err.code(), "ERR_BUDGET_MATCHES");

        // Delivered matches are exactly the unbudgeted prefix.
        let sel = Arc::new(parse_query("{ id }").unwrap());
        let mut p = Projector::new(
            sel,
            CollectSink::default(),
            Options {
                budget: Budget {
                    max_matches: Some(2),
                    ..Budget::default()
                },
                ..Options::default()
            },
        );
        assert!(p.execute(input).is_err());
        let (unbounded, full_sink) = run("{ id }", input);
        assert!(unbounded.is_some());
        assert_eq!(p.sink().matches[..], full_sink.matches[..2]);
    }

    #[test]
    fn byte_budget_trips() {
        let opts = Options {
            budget: Budget {
                max_bytes: Some(8),
                ..Budget::default()
            },
            ..Options::default()
        };
        let err = run_opts("{ id }", br#"[{"id":1},{"id":2}]"#, opts).unwrap_err();
        assert_eq!(err.code(), "ERR_BUDGET_BYTES");
    }

    #[test]
    fn cancellation_aborts_between_chunks() {
        let cancel = CancelFlag::new();
        let sel = Arc::new(parse_query("{ id }").unwrap());
        let mut p = Projector::new(
            sel,
            CollectSink::default(),
            Options {
                cancel: cancel.clone(),
                ..Options::default()
            },
        );
        p.process_chunk(br#"[{"id":1},"#).unwrap();
        cancel.cancel();
        let err = p.process_chunk(br#"{"id":2}]"#).unwrap_err();
        assert_eq!(err.code(), "ERR_ABORTED");
        // Prior emissions remain valid.
        assert_eq!(p.sink().matches.len(), 1);
    }

    #[test]
    fn fanout_depth_guard() {
        let mut input = Vec::new();
        for _ in 0..30 {
            input.extend_from_slice(br#"{"x":"#);
        }
        input.extend_from_slice(b"1");
        input.extend(std::iter::repeat(b'}').take(30));
        let opts = Options {
            fanout: Some(FanoutLimits {
                max_depth: 10,
                ..FanoutLimits::default()
            }),
            ..Options::default()
        };
        let err = run_opts("{ x }", &input, opts).unwrap_err();
        assert_eq!(err.code(), "ERR_FANOUT_DEPTH");
    }

    #[test]
    fn fanout_guard_applies_inside_skip() {
        // The deep structure sits under an unselected key.
        let mut input = Vec::new();
        input.extend_from_slice(br#"{"drop":"#);
        for _ in 0..30 {
            input.extend_from_slice(br#"{"x":"#);
        }
        input.extend_from_slice(b"1");
        input.extend(std::iter::repeat(b'}').take(30));
        input.extend_from_slice(br#","keep":1}"#);
        let opts = Options {
            fanout: Some(FanoutLimits {
                max_depth: 10,
                ..FanoutLimits::default()
            }),
            ..Options::default()
        };
        let err = run_opts("{ keep }", &input, opts).unwrap_err();
        assert_eq!(err.code(), "ERR_FANOUT_DEPTH");
    }

    #[test]
    fn fanout_array_width_guard() {
        let opts = Options {
            fanout: Some(FanoutLimits {
                max_array_size: 3,
                ..FanoutLimits::default()
            }),
            ..Options::default()
        };
        let err = run_opts("{ xs }", br#"{"xs":[1,2,3,4,5]}"#, opts).unwrap_err();
        assert_eq!(err.code(), "ERR_FANOUT_ARRAY_SIZE");
    }

    #[test]
    fn deep_nesting_without_guard_completes() {
        let depth = 1000;
        let mut input = Vec::new();
        input.extend_from_slice(br#"{"deep":"#);
        for _ in 0..depth {
            input.extend_from_slice(b"[");
        }
        input.extend_from_slice(b"1");
        input.extend(std::iter::repeat(b']').take(depth));
        input.extend_from_slice(br#","keep":2}"#);
        let (result, _) = run("{ keep }", &input);
        assert_eq!(compact(&result), r#"{"keep":2}"#);
    }

    #[test]
    fn reset_makes_runs_idempotent() {
        let input = br#"{"a":1,"b":2}"#;
        let sel = Arc::new(parse_query("{ a }").unwrap());
        let mut p = Projector::new(sel, CollectSink::default(), Options::default());
        p.execute(input).unwrap();
        let first = p.take_result();
        p.reset();
        p.execute(input).unwrap();
        assert_eq!(p.take_result(), first);
        assert_eq!(p.sink().matches.len(), 2);
    }

    #[test]
    fn stats_are_delivered_on_finish() {
        let (_, sink) = run("{ id }", br#"{"id":1}"#);
        let stats = sink.stats.expect("stats");
        assert_eq!(stats.matched_count, 1);
        assert_eq!(stats.processed_bytes, 8);
    }
}
