//! Streaming JSON projection.
//!
//! Given a selection string and a byte stream carrying JSON, produce the
//! selected subset without materializing the whole document: processing
//! cost follows the *selected* data, auxiliary memory follows nesting
//! depth. The tokenizer lexes chunks as they arrive and survives any
//! split point; the engine resolves each token against the selection
//! tree, builds output containers, and consumes unselected subtrees in a
//! skip mode that tracks nothing but structure.
//!
//! ```
//! let result = sift::project("{ id, name }", br#"{"id":1,"name":"A","junk":[]}"#)
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(result.to_compact_string(), r#"{"id":1,"name":"A"}"#);
//! ```

pub mod budget;
mod capture;
pub mod directive;
pub mod engine;
pub mod error;
pub mod index;
pub mod ndjson;
pub mod parallel;
pub mod query;
pub mod selection;
pub mod sink;
pub mod skip;
pub mod stream;
pub mod tokenizer;
pub mod value;

use std::sync::Arc;

pub use budget::{Budget, CancelFlag, Control};
pub use engine::{EmitMode, Options, Projector, DEFAULT_WINDOW, MIN_WINDOW};
pub use error::{BudgetKind, FanoutKind, SiftError};
pub use ndjson::{LineError, NdjsonDriver, NdjsonOptions};
pub use query::parse_query;
pub use selection::{Selection, SelectionNode};
pub use sink::{CollectSink, GzipSink, NullSink, Sink, Stats};
pub use skip::FanoutLimits;
pub use stream::{ProjectionStream, StreamEvent};
pub use tokenizer::{Token, TokenKind, Tokenizer};
pub use value::{JsonValue, Number};

/// One-shot convenience: parse the query, run the whole buffer, return the
/// final result.
pub fn project(query: &str, input: &[u8]) -> Result<Option<JsonValue>, SiftError> {
    let selection = Arc::new(parse_query(query)?);
    let mut projector = Projector::new(selection, NullSink, Options::default());
    projector.execute(input)?;
    Ok(projector.take_result())
}
