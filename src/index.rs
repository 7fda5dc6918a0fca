//! Root-key offset sidecar for repeated queries over one immutable buffer.
//
//  One preprocessing pass records where every root-level key sits; later
//  queries start the engine just before the earliest requested key instead
//  of at byte 0. Purely an optimization: any key the index cannot place
//  falls back to a full scan, so correctness never depends on it. The
//  borrow ties the index to the buffer, which cannot change underneath it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::{Options, Projector};
use crate::error::SiftError;
use crate::selection::{Selection, SelectionNode};
use crate::sink::NullSink;
use crate::tokenizer::{TokenKind, Tokenizer};
use crate::value::JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootEntry {
    /// Offset of the key's opening quote.
    pub key_start: u64,
    /// Offset of the colon that follows the key.
    pub colon: u64,
}

#[derive(Debug, Default)]
pub struct RootIndex {
    entries: HashMap<String, RootEntry>,
}

impl RootIndex {
    /// Scan a buffer once and map each root-level object key to its
    /// offsets. A non-object root yields an empty index.
    pub fn build(buf: &[u8]) -> Result<RootIndex, SiftError> {
        let mut lexer = Tokenizer::new();
        let mut entries = HashMap::new();
        let mut depth = 0usize;
        let mut expect_key = false;
        let mut pending: Option<(String, u64)> = None;

        for tok in lexer.tokens(buf) {
            let tok = tok?;
            match tok.kind {
                TokenKind::LBrace => {
                    depth += 1;
                    expect_key = depth == 1;
                    pending = None;
                }
                TokenKind::LBracket => {
                    depth += 1;
                    expect_key = false;
                }
                TokenKind::RBrace | TokenKind::RBracket => {
                    depth = depth.saturating_sub(1);
                    expect_key = false;
                }
                TokenKind::Comma if depth == 1 => expect_key = true,
                TokenKind::Str if depth == 1 && expect_key => {
                    if let Some(s) = tok.str_value() {
                        pending = Some((s.to_string(), tok.start));
                    }
                    expect_key = false;
                }
                TokenKind::Colon if depth == 1 => {
                    if let Some((key, key_start)) = pending.take() {
                        entries.insert(
                            key,
                            RootEntry {
                                key_start,
                                colon: tok.start,
                            },
                        );
                    }
                }
                _ => {}
            }
        }
        Ok(RootIndex { entries })
    }

    pub fn get(&self, key: &str) -> Option<&RootEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An immutable buffer plus its root index.
pub struct IndexedBuffer<'a> {
    buf: &'a [u8],
    index: RootIndex,
}

impl<'a> IndexedBuffer<'a> {
    pub fn new(buf: &'a [u8]) -> Result<IndexedBuffer<'a>, SiftError> {
        Ok(IndexedBuffer {
            buf,
            index: RootIndex::build(buf)?,
        })
    }

    pub fn index(&self) -> &RootIndex {
        &self.index
    }

    /// Run one materialized projection, starting at the earliest root key
    /// the query asks for when the index can place one.
    pub fn project(
        &self,
        selection: Arc<SelectionNode>,
        opts: Options,
    ) -> Result<Option<JsonValue>, SiftError> {
        let mut projector = Projector::new(selection.clone(), NullSink, opts);
        match self.start_offset(selection.children()) {
            Some(at) => {
                // A synthetic brace re-opens the root; everything before
                // the earliest requested key is unselected anyway.
                projector.process_chunk(b"{")?;
                projector.process_chunk(&self.buf[at as usize..])?;
                projector.finish()?;
            }
            None => projector.execute(self.buf)?,
        }
        Ok(projector.take_result())
    }

    fn start_offset(&self, children: Option<&Selection>) -> Option<u64> {
        let children = children?;
        let mut earliest: Option<u64> = None;
        for key in children.keys() {
            if let Some(entry) = self.index.get(key) {
                earliest = Some(match earliest {
                    Some(at) => at.min(entry.key_start),
                    None => entry.key_start,
                });
            }
            // Absent keys contribute nothing; they cannot match anywhere.
        }
        earliest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_query;

    const DOC: &[u8] =
        br#"{"alpha":{"deep":[1,2,3]},"beta":"text { with braces","gamma":42,"delta":[true]}"#;

    #[test]
    fn index_records_key_and_colon_offsets() {
        let index = RootIndex::build(DOC).unwrap();
        assert_eq!(index.len(), 4);
        let beta = index.get("beta").unwrap();
        assert_eq!(&DOC[beta.key_start as usize..beta.colon as usize], br#""beta""#);
        assert_eq!(DOC[beta.colon as usize], b':');
        // Nested keys never land in the root index.
        assert!(index.get("deep").is_none());
    }

    #[test]
    fn projection_from_offset_matches_full_scan() {
        let indexed = IndexedBuffer::new(DOC).unwrap();
        for query in ["{ gamma }", "{ beta, gamma }", "{ alpha { deep } , delta }"] {
            let selection = Arc::new(parse_query(query).unwrap());
            let via_index = indexed
                .project(selection.clone(), Options::default())
                .unwrap();
            let mut full = Projector::new(selection, NullSink, Options::default());
            full.execute(DOC).unwrap();
            assert_eq!(via_index, full.take_result(), "query {}", query);
        }
    }

    #[test]
    fn absent_keys_fall_back_cleanly() {
        let indexed = IndexedBuffer::new(DOC).unwrap();
        let selection =
            Arc::new(parse_query(r#"{ nope @default(value:"none"), gamma }"#).unwrap());
        let result = indexed.project(selection, Options::default()).unwrap();
        assert_eq!(
            result.map(|v| v.to_compact_string()),
            Some(r#"{"gamma":42,"nope":"none"}"#.to_string())
        );
    }

    #[test]
    fn array_root_yields_empty_index() {
        let buf = br#"[{"a":1}]"#;
        let indexed = IndexedBuffer::new(buf).unwrap();
        assert!(indexed.index().is_empty());
        let selection = Arc::new(parse_query("{ a }").unwrap());
        let result = indexed.project(selection, Options::default()).unwrap();
        assert_eq!(
            result.map(|v| v.to_compact_string()),
            Some(r#"[{"a":1}]"#.to_string())
        );
    }
}
