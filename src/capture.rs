//! Raw-mode byte capture across chunk boundaries.
//
//  A match can start in one chunk and end many chunks later. Between the
//  two points only the bytes belonging to the in-flight match are
//  retained, so the extra memory is bounded by the match size, not the
//  stream size. Assembly walks the retained segments in order and tops up
//  from the current chunk.

#[derive(Debug, Default)]
pub struct RawCapture {
    active: bool,
    start: u64,
    // Retained segments from earlier chunks, contiguous and in stream
    // order; the first one begins exactly at `start`.
    segs: Vec<Vec<u8>>,
}

impl RawCapture {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Arm the capture at the first byte of a recognized match.
    pub fn begin(&mut self, start: u64) {
        debug_assert!(!self.active);
        self.active = true;
        self.start = start;
        self.segs.clear();
    }

    /// The engine is leaving `chunk` with the capture still open: retain
    /// the part of it that belongs to the match.
    pub fn retain(&mut self, chunk_base: u64, chunk: &[u8]) {
        if !self.active {
            return;
        }
        let from = self.start.saturating_sub(chunk_base) as usize;
        if from < chunk.len() {
            self.segs.push(chunk[from..].to_vec());
        }
    }

    /// Close the capture at `end` (exclusive) and assemble the contiguous
    /// match bytes; `chunk` is the chunk containing `end`.
    pub fn take(&mut self, end: u64, chunk_base: u64, chunk: &[u8]) -> Vec<u8> {
        debug_assert!(self.active);
        let mut out = Vec::with_capacity((end - self.start) as usize);
        for seg in &self.segs {
            out.extend_from_slice(seg);
        }
        let from = if self.segs.is_empty() {
            (self.start - chunk_base) as usize
        } else {
            0
        };
        let to = (end - chunk_base) as usize;
        out.extend_from_slice(&chunk[from..to]);
        self.active = false;
        self.segs.clear();
        out
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.segs.clear();
        self.start = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_chunk_span() {
        let mut cap = RawCapture::default();
        let chunk = b"xx{\"a\":1}yy";
        cap.begin(2);
        let got = cap.take(9, 0, chunk);
        assert_eq!(got, b"{\"a\":1}");
        assert!(!cap.is_active());
    }

    #[test]
    fn two_chunk_span() {
        let mut cap = RawCapture::default();
        cap.begin(2);
        cap.retain(0, b"xx{\"a\"");
        let got = cap.take(11, 6, b":1}yy");
        assert_eq!(got, b"{\"a\":1}");
    }

    #[test]
    fn many_chunk_span_keeps_order() {
        let mut cap = RawCapture::default();
        cap.begin(1);
        cap.retain(0, b"x[1,");
        cap.retain(4, b"2,3,");
        cap.retain(8, b"4,5,");
        let got = cap.take(15, 12, b"6]tail");
        assert_eq!(got, b"[1,2,3,4,5,6]");
    }

    #[test]
    fn retain_ignores_chunks_before_start() {
        let mut cap = RawCapture::default();
        cap.begin(10);
        // Chunk entirely before the capture start contributes nothing.
        cap.retain(0, b"0123456789");
        assert_eq!(cap.take(12, 10, b"ab"), b"ab");
    }
}
