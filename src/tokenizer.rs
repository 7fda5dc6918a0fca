//! Forward-only, state-carrying JSON tokenizer that survives chunk splits.
//
//  Bytes arrive in chunks; the FSM state and the accumulator live across
//  `feed()` calls, so a string, number or literal that starts in chunk k
//  and ends in chunk k+1 is emitted exactly once with correct logical
//  offsets. The callback path mutates one reusable `Token` record; callers
//  must copy what they need before the next token lands.

use std::collections::HashMap;
use std::sync::Arc;

use crate::budget::{Control, CHECK_INTERVAL};
use crate::error::SiftError;
use crate::value::Number;

/// Initial accumulator capacity; steady-state token scanning does not
/// allocate unless a single token outgrows this.
const ACC_CAPACITY: usize = 64 * 1024;
/// Strings shorter than this are interned.
const INTERN_MAX_LEN: usize = 32;
/// Intern cache entry cap; beyond it new strings are decoded uncached.
const INTERN_MAX_ENTRIES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Str,
    Num,
    True,
    False,
    Null,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    Str(Arc<str>),
    Num(Number),
}

/// One lexical token. `[start, end)` delimits it in the logical stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: u64,
    pub end: u64,
    pub value: Option<TokenValue>,
}

impl Default for Token {
    fn default() -> Self {
        Token {
            kind: TokenKind::Eof,
            start: 0,
            end: 0,
            value: None,
        }
    }
}

impl Token {
    pub fn str_value(&self) -> Option<&Arc<str>> {
        match &self.value {
            Some(TokenValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn num_value(&self) -> Option<Number> {
        match &self.value {
            Some(TokenValue::Num(n)) => Some(*n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LexState {
    Idle,
    Str { escape: bool },
    Num,
    Literal {
        kind: TokenKind,
        target: &'static [u8],
    },
}

/// Bounded content-keyed cache for short strings. Object keys repeat
/// endlessly in record streams; the cache turns their decode into a map
/// hit returning a shared `Arc<str>`.
#[derive(Debug, Default)]
struct Interner {
    map: HashMap<Box<[u8]>, Arc<str>>,
}

impl Interner {
    fn resolve(&mut self, bytes: &[u8]) -> Arc<str> {
        if let Some(s) = self.map.get(bytes) {
            return s.clone();
        }
        let s: Arc<str> = Arc::from(String::from_utf8_lossy(bytes).as_ref());
        if self.map.len() < INTERN_MAX_ENTRIES {
            self.map.insert(bytes.into(), s.clone());
        }
        s
    }
}

#[derive(Debug)]
pub struct Tokenizer {
    state: LexState,
    pos: u64,       // logical offset of the next unconsumed byte
    tok_start: u64, // logical offset where the current token began
    acc: Vec<u8>,
    intern: Interner,
    scratch: Token,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Tokenizer::new()
    }
}

impl Tokenizer {
    pub fn new() -> Tokenizer {
        Tokenizer {
            state: LexState::Idle,
            pos: 0,
            tok_start: 0,
            acc: Vec::with_capacity(ACC_CAPACITY),
            intern: Interner::default(),
            scratch: Token::default(),
        }
    }

    /// Clear FSM state; the next chunk is treated as position 0. The intern
    /// cache survives (it is content-keyed).
    pub fn reset(&mut self) {
        self.state = LexState::Idle;
        self.pos = 0;
        self.tok_start = 0;
        self.acc.clear();
    }

    /// Logical offset of the next unconsumed byte.
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, LexState::Idle)
    }

    /// Advance the logical position past bytes consumed outside the
    /// tokenizer (the engine's byte-level skip scan). Only legal at `Idle`.
    pub fn advance(&mut self, n: u64) {
        debug_assert!(self.is_idle());
        self.pos += n;
    }

    /// Push the next contiguous chunk through the FSM, invoking `on_token`
    /// once per completed token with a reference to the reusable record.
    /// May consume the whole chunk without producing any token.
    pub fn feed<F>(&mut self, chunk: &[u8], ctl: &Control, mut on_token: F) -> Result<(), SiftError>
    where
        F: FnMut(&Token) -> Result<(), SiftError>,
    {
        let base = self.pos;
        let mut i = 0usize;
        loop {
            match self.scan_next(chunk, base, &mut i, Some(ctl)) {
                Ok(true) => on_token(&self.scratch)?,
                Ok(false) => break,
                Err(e) => {
                    self.pos = base + i as u64;
                    return Err(e);
                }
            }
        }
        self.pos = base + chunk.len() as u64;
        Ok(())
    }

    /// Pull-style variant over the same FSM; each item is a fresh record.
    /// Drain the iterator before feeding the next chunk.
    pub fn tokens<'t, 'c>(&'t mut self, chunk: &'c [u8]) -> TokenIter<'t, 'c> {
        let base = self.pos;
        TokenIter {
            lexer: self,
            chunk,
            base,
            i: 0,
            fused: false,
        }
    }

    /// End of stream: flush a pending number and emit `Eof`. An unclosed
    /// string or literal produces nothing.
    pub fn finish<F>(&mut self, mut on_token: F) -> Result<(), SiftError>
    where
        F: FnMut(&Token) -> Result<(), SiftError>,
    {
        if matches!(self.state, LexState::Num) {
            let value = self.parse_number()?;
            self.scratch = Token {
                kind: TokenKind::Num,
                start: self.tok_start,
                end: self.pos,
                value: Some(TokenValue::Num(value)),
            };
            self.state = LexState::Idle;
            on_token(&self.scratch)?;
        }
        self.scratch = Token {
            kind: TokenKind::Eof,
            start: self.pos,
            end: self.pos,
            value: None,
        };
        on_token(&self.scratch)
    }

    /// Drive the FSM until one token completes (`Ok(true)`, token in
    /// `self.scratch`) or the chunk is exhausted (`Ok(false)`).
    fn scan_next(
        &mut self,
        chunk: &[u8],
        base: u64,
        i: &mut usize,
        ctl: Option<&Control>,
    ) -> Result<bool, SiftError> {
        while *i < chunk.len() {
            if *i & (CHECK_INTERVAL - 1) == 0 {
                if let Some(ctl) = ctl {
                    ctl.checkpoint(base + *i as u64)?;
                }
            }
            let b = chunk[*i];
            let at = base + *i as u64;

            match self.state {
                LexState::Idle => {
                    match b {
                        b'{' => return self.emit_structural(TokenKind::LBrace, at, i),
                        b'}' => return self.emit_structural(TokenKind::RBrace, at, i),
                        b'[' => return self.emit_structural(TokenKind::LBracket, at, i),
                        b']' => return self.emit_structural(TokenKind::RBracket, at, i),
                        b':' => return self.emit_structural(TokenKind::Colon, at, i),
                        b',' => return self.emit_structural(TokenKind::Comma, at, i),
                        b'"' => {
                            self.state = LexState::Str { escape: false };
                            self.tok_start = at;
                            self.acc.clear();
                            *i += 1;
                        }
                        b't' => self.open_literal(TokenKind::True, b"true", at, i),
                        b'f' => self.open_literal(TokenKind::False, b"false", at, i),
                        b'n' => self.open_literal(TokenKind::Null, b"null", at, i),
                        b'-' | b'0'..=b'9' => {
                            self.state = LexState::Num;
                            self.tok_start = at;
                            self.acc.clear();
                            self.acc.push(b);
                            *i += 1;
                        }
                        // Whitespace and anything else between tokens is
                        // tolerated.
                        _ => *i += 1,
                    }
                }

                LexState::Str { escape } => {
                    if escape {
                        // Escape bodies are kept verbatim, backslash
                        // included; raw-mode round trips depend on it.
                        self.acc.push(b);
                        self.state = LexState::Str { escape: false };
                        *i += 1;
                    } else if b == b'\\' {
                        self.acc.push(b'\\');
                        self.state = LexState::Str { escape: true };
                        *i += 1;
                    } else if b == b'"' {
                        let value = if self.acc.len() < INTERN_MAX_LEN {
                            self.intern.resolve(&self.acc)
                        } else {
                            Arc::from(String::from_utf8_lossy(&self.acc).as_ref())
                        };
                        self.scratch = Token {
                            kind: TokenKind::Str,
                            start: self.tok_start,
                            end: at + 1,
                            value: Some(TokenValue::Str(value)),
                        };
                        self.state = LexState::Idle;
                        *i += 1;
                        return Ok(true);
                    } else {
                        self.acc.push(b);
                        *i += 1;
                    }
                }

                LexState::Num => match b {
                    b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-' => {
                        self.acc.push(b);
                        *i += 1;
                    }
                    _ => {
                        // Terminator byte is re-examined at Idle.
                        let value = self.parse_number()?;
                        self.scratch = Token {
                            kind: TokenKind::Num,
                            start: self.tok_start,
                            end: at,
                            value: Some(TokenValue::Num(value)),
                        };
                        self.state = LexState::Idle;
                        return Ok(true);
                    }
                },

                LexState::Literal { kind, target } => {
                    self.acc.push(b);
                    *i += 1;
                    if self.acc.len() == target.len() {
                        if self.acc == target {
                            self.scratch = Token {
                                kind,
                                start: self.tok_start,
                                end: self.tok_start + target.len() as u64,
                                value: None,
                            };
                            self.state = LexState::Idle;
                            return Ok(true);
                        }
                        return Err(SiftError::InvalidLiteral {
                            found: String::from_utf8_lossy(&self.acc).into_owned(),
                            offset: self.tok_start,
                        });
                    }
                }
            }
        }
        Ok(false)
    }

    fn emit_structural(
        &mut self,
        kind: TokenKind,
        at: u64,
        i: &mut usize,
    ) -> Result<bool, SiftError> {
        self.scratch = Token {
            kind,
            start: at,
            end: at + 1,
            value: None,
        };
        *i += 1;
        Ok(true)
    }

    fn open_literal(&mut self, kind: TokenKind, target: &'static [u8], at: u64, i: &mut usize) {
        self.state = LexState::Literal { kind, target };
        self.tok_start = at;
        self.acc.clear();
        self.acc.push(target[0]);
        *i += 1;
    }

    /// Integer fast path over pure digit runs, general float parse for
    /// everything else. The FSM accepts a loose charset; malformed numbers
    /// are rejected here.
    fn parse_number(&self) -> Result<Number, SiftError> {
        let bytes = &self.acc;
        let (neg, digits) = match bytes.split_first() {
            Some((b'-', rest)) => (true, rest),
            _ => (false, &bytes[..]),
        };
        if !digits.is_empty() && digits.iter().all(|b| b.is_ascii_digit()) {
            let mut value: i64 = 0;
            let mut overflow = false;
            for &b in digits {
                value = match value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add((b - b'0') as i64))
                {
                    Some(v) => v,
                    None => {
                        overflow = true;
                        break;
                    }
                };
            }
            if !overflow {
                return Ok(Number::Integer(if neg { -value } else { value }));
            }
        }
        let text = std::str::from_utf8(bytes).map_err(|_| SiftError::InvalidNumber {
            found: String::from_utf8_lossy(bytes).into_owned(),
            offset: self.tok_start,
        })?;
        text.parse::<f64>()
            .map(Number::Float)
            .map_err(|_| SiftError::InvalidNumber {
                found: text.to_owned(),
                offset: self.tok_start,
            })
    }
}

pub struct TokenIter<'t, 'c> {
    lexer: &'t mut Tokenizer,
    chunk: &'c [u8],
    base: u64,
    i: usize,
    fused: bool,
}

impl Iterator for TokenIter<'_, '_> {
    type Item = Result<Token, SiftError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        match self
            .lexer
            .scan_next(self.chunk, self.base, &mut self.i, None)
        {
            Ok(true) => Some(Ok(self.lexer.scratch.clone())),
            Ok(false) => {
                self.lexer.pos = self.base + self.chunk.len() as u64;
                self.fused = true;
                None
            }
            Err(e) => {
                self.lexer.pos = self.base + self.i as u64;
                self.fused = true;
                Some(Err(e))
            }
        }
    }
}
