//! Push façade over the projection engine.
//
//  `push()` bytes in, collect the matches observed so far, `finish()` for
//  the final result. One engine per stream; construct a new one per flow.

use std::sync::Arc;

use crate::engine::{Options, Projector};
use crate::error::SiftError;
use crate::query::parse_query;
use crate::selection::SelectionNode;
use crate::sink::{CollectSink, Stats};
use crate::value::JsonValue;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A materialized match (object mode).
    Match(JsonValue),
    /// Exact source bytes of a match (raw mode).
    Raw(Vec<u8>),
}

pub struct ProjectionStream {
    proj: Projector<CollectSink>,
}

impl ProjectionStream {
    pub fn new(query: &str, opts: Options) -> Result<ProjectionStream, SiftError> {
        let selection = Arc::new(parse_query(query)?);
        Ok(ProjectionStream::with_selection(selection, opts))
    }

    pub fn with_selection(selection: Arc<SelectionNode>, opts: Options) -> ProjectionStream {
        ProjectionStream {
            proj: Projector::new(selection, CollectSink::default(), opts),
        }
    }

    /// Feed the next chunk; returns every match completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, SiftError> {
        self.proj.process_chunk(chunk)?;
        Ok(self.drain())
    }

    /// Signal end of input; returns trailing matches and the final result.
    pub fn finish(&mut self) -> Result<(Vec<StreamEvent>, Option<JsonValue>), SiftError> {
        self.proj.finish()?;
        let events = self.drain();
        Ok((events, self.proj.take_result()))
    }

    pub fn stats(&self) -> Stats {
        self.proj.stats()
    }

    fn drain(&mut self) -> Vec<StreamEvent> {
        let sink = self.proj.sink_mut();
        let mut events = Vec::with_capacity(sink.matches.len() + sink.raw.len());
        events.extend(sink.matches.drain(..).map(StreamEvent::Match));
        events.extend(sink.raw.drain(..).map(StreamEvent::Raw));
        events
    }
}
