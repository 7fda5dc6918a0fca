//! Subtree skipping without semantic work.
//
//  While an unselected subtree is being discarded the engine only needs to
//  know when it ends. Token-mode skipping counts structural tokens; the
//  byte-mode `scan` goes further and walks raw bytes tracking nothing but
//  nesting and string state, so a whole window can be consumed without the
//  lexer ever running. Brace counting must not fire inside a string value,
//  hence the two-state string micro-FSM (`"` toggles, `\` eats one byte).

use crate::budget::{Control, CHECK_INTERVAL};
use crate::error::{FanoutKind, SiftError};

/// Limits for the optional fan-out guard (applied in skip mode too,
/// otherwise a deep unselected subtree would bypass them).
#[derive(Debug, Clone)]
pub struct FanoutLimits {
    pub max_depth: usize,
    pub max_array_size: u64,
    pub max_object_keys: u64,
}

impl Default for FanoutLimits {
    fn default() -> Self {
        FanoutLimits {
            max_depth: 100,
            max_array_size: 100_000,
            max_object_keys: 10_000,
        }
    }
}

impl FanoutLimits {
    pub fn check_depth(&self, depth: usize, offset: u64) -> Result<(), SiftError> {
        if depth > self.max_depth {
            return Err(SiftError::FanoutExceeded {
                kind: FanoutKind::Depth,
                limit: self.max_depth as u64,
                offset,
            });
        }
        Ok(())
    }

    pub fn check_width(
        &self,
        is_array: bool,
        children: u64,
        offset: u64,
    ) -> Result<(), SiftError> {
        let (limit, kind) = if is_array {
            (self.max_array_size, FanoutKind::ArraySize)
        } else {
            (self.max_object_keys, FanoutKind::ObjectKeys)
        };
        if children > limit {
            return Err(SiftError::FanoutExceeded {
                kind,
                limit,
                offset,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Level {
    is_array: bool,
    // Commas seen at this level; width = commas + 1 once any child exists.
    commas: u64,
}

/// Result of one byte-mode scan call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Bytes consumed from the input slice.
    pub consumed: usize,
    /// True when the outermost skipped structure closed on the last
    /// consumed byte.
    pub closed: bool,
}

/// Nesting state of the subtree currently being skipped. Persisted on the
/// engine across chunks; fed by tokens in the normal path and by raw bytes
/// on the chunked fast path.
#[derive(Debug, Default)]
pub struct SkipState {
    levels: Vec<Level>,
    in_string: bool,
    escaped: bool,
    /// Engine stack depth at skip entry, for the depth guard.
    outer_depth: usize,
}

impl SkipState {
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn is_active(&self) -> bool {
        !self.levels.is_empty()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
        self.in_string = false;
        self.escaped = false;
        self.outer_depth = 0;
    }

    /// Enter skip mode at the structure that opens the unselected subtree.
    pub fn enter(
        &mut self,
        is_array: bool,
        outer_depth: usize,
        guard: Option<&FanoutLimits>,
        offset: u64,
    ) -> Result<(), SiftError> {
        debug_assert!(self.levels.is_empty());
        self.outer_depth = outer_depth;
        self.in_string = false;
        self.escaped = false;
        self.open(is_array, guard, offset)
    }

    /// A nested structure opened inside the skipped subtree.
    pub fn open(
        &mut self,
        is_array: bool,
        guard: Option<&FanoutLimits>,
        offset: u64,
    ) -> Result<(), SiftError> {
        if let Some(g) = guard {
            g.check_depth(self.outer_depth + self.levels.len() + 1, offset)?;
        }
        self.levels.push(Level {
            is_array,
            commas: 0,
        });
        Ok(())
    }

    /// A structure closed; returns true when the skipped subtree is done.
    pub fn close(&mut self) -> bool {
        self.levels.pop();
        self.levels.is_empty()
    }

    /// A comma at the current level; widths are counted through commas so
    /// the guard holds without lexing keys or values.
    pub fn child(&mut self, guard: Option<&FanoutLimits>, offset: u64) -> Result<(), SiftError> {
        if let Some(level) = self.levels.last_mut() {
            level.commas += 1;
            if let Some(g) = guard {
                g.check_width(level.is_array, level.commas + 1, offset)?;
            }
        }
        Ok(())
    }

    /// Byte-mode fast path: consume raw bytes until the skipped structure
    /// closes or the slice runs out. `base` is the logical offset of
    /// `bytes[0]`.
    pub fn scan(
        &mut self,
        bytes: &[u8],
        base: u64,
        ctl: &Control,
        guard: Option<&FanoutLimits>,
    ) -> Result<ScanOutcome, SiftError> {
        debug_assert!(self.is_active());
        for (i, &b) in bytes.iter().enumerate() {
            if i & (CHECK_INTERVAL - 1) == 0 {
                ctl.checkpoint(base + i as u64)?;
            }
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' => self.open(false, guard, base + i as u64)?,
                b'[' => self.open(true, guard, base + i as u64)?,
                b'}' | b']' => {
                    if self.close() {
                        return Ok(ScanOutcome {
                            consumed: i + 1,
                            closed: true,
                        });
                    }
                }
                b',' => self.child(guard, base + i as u64)?,
                _ => {}
            }
        }
        Ok(ScanOutcome {
            consumed: bytes.len(),
            closed: false,
        })
    }
}
