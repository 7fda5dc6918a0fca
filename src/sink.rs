//! Output sinks: where emitted matches go.
//
//  The engine calls into the sink synchronously and never awaits it;
//  backpressure belongs to the layer driving the engine.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use log::warn;

use crate::value::JsonValue;

/// Runtime telemetry delivered through `on_stats`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub matched_count: u64,
    pub processed_bytes: u64,
    pub duration_ms: f64,
    pub throughput_mbps: f64,
    /// Fraction of wall time spent inside skip mode.
    pub skip_ratio: f64,
}

/// Consumer contract; implement any subset.
pub trait Sink {
    /// One materialized match (object mode).
    fn on_match(&mut self, _value: &JsonValue) {}
    /// Exact source bytes of one match (raw mode).
    fn on_raw_match(&mut self, _bytes: &[u8]) {}
    fn on_stats(&mut self, _stats: &Stats) {}
    /// Final completion signal after the last input chunk.
    fn on_drain(&mut self) {}
}

/// Sink that discards everything; useful when only the final result or
/// the counters matter.
#[derive(Debug, Default)]
pub struct NullSink;

impl Sink for NullSink {}

/// Buffers everything it receives; the test and façade workhorse.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub matches: Vec<JsonValue>,
    pub raw: Vec<Vec<u8>>,
    pub stats: Option<Stats>,
    pub drained: bool,
}

impl Sink for CollectSink {
    fn on_match(&mut self, value: &JsonValue) {
        self.matches.push(value.clone());
    }

    fn on_raw_match(&mut self, bytes: &[u8]) {
        self.raw.push(bytes.to_vec());
    }

    fn on_stats(&mut self, stats: &Stats) {
        self.stats = Some(stats.clone());
    }

    fn on_drain(&mut self) {
        self.drained = true;
    }
}

/// Compression sink: newline-delimited matches through a gzip encoder.
/// Raw matches are written as-is; materialized matches are serialized
/// compactly. `finish()` returns the inner writer.
pub struct GzipSink<W: Write> {
    encoder: Option<GzEncoder<W>>,
}

impl<W: Write> GzipSink<W> {
    pub fn new(writer: W) -> GzipSink<W> {
        GzipSink {
            encoder: Some(GzEncoder::new(writer, Compression::default())),
        }
    }

    pub fn finish(mut self) -> std::io::Result<W> {
        match self.encoder.take() {
            Some(enc) => enc.finish(),
            None => unreachable!("encoder taken only in finish"),
        }
    }

    fn write_line(&mut self, bytes: &[u8]) {
        if let Some(enc) = self.encoder.as_mut() {
            if let Err(e) = enc.write_all(bytes).and_then(|_| enc.write_all(b"\n")) {
                warn!("gzip sink write failed: {}", e);
            }
        }
    }
}

impl<W: Write> Sink for GzipSink<W> {
    fn on_match(&mut self, value: &JsonValue) {
        let line = value.to_compact_string();
        self.write_line(line.as_bytes());
    }

    fn on_raw_match(&mut self, bytes: &[u8]) {
        self.write_line(bytes);
    }

    fn on_drain(&mut self) {
        if let Some(enc) = self.encoder.as_mut() {
            if let Err(e) = enc.flush() {
                warn!("gzip sink flush failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Number;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn collect_sink_gathers_everything() {
        let mut sink = CollectSink::default();
        sink.on_match(&JsonValue::Number(Number::Integer(1)));
        sink.on_raw_match(b"{}");
        sink.on_drain();
        assert_eq!(sink.matches.len(), 1);
        assert_eq!(sink.raw, vec![b"{}".to_vec()]);
        assert!(sink.drained);
    }

    #[test]
    fn gzip_sink_roundtrips_lines() {
        let mut sink = GzipSink::new(Vec::new());
        sink.on_match(&JsonValue::Boolean(true));
        sink.on_raw_match(br#"{"id":1}"#);
        sink.on_drain();
        let compressed = sink.finish().unwrap();

        let mut text = String::new();
        GzDecoder::new(&compressed[..])
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "true\n{\"id\":1}\n");
    }
}
