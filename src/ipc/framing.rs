//! Reassembly of backend stdout into complete protocol records.
//!
//! Pipes deliver bytes at arbitrary boundaries: a read can end in the middle
//! of a line or even in the middle of a multi-byte UTF-8 character. The
//! framer accumulates raw bytes and only hands out a [`Frame`] once its
//! terminator has been observed. Nothing is decoded here, so a character
//! split across two reads is whole by the time a codec sees it.
//!
//! # Framing modes
//!
//! ```text
//! Line:          {"Update":[...]}\n          one frame per non-blank line
//! CountedBatch:  2\n/a/b.txt\n/c/d.png\n     one frame per count line plus its items
//! ```
//!
//! In `CountedBatch` mode the first line of a batch declares an item count,
//! and the batch is complete once that many non-blank lines have followed it.
//! Lines after that start the next batch, so two answers that arrive in one
//! read still come out as two frames. A line that does not parse as a count
//! where a header is expected is dropped. A backend that announces more
//! items than it sends leaves a short batch pending, and the reader releases
//! it with [`LineFramer::flush_batch`] once the pipe has gone quiet.

use std::borrow::Cow;
use std::collections::VecDeque;

use tracing::debug;

use super::error::IpcError;

/// Maximum buffered bytes (16MB) before a record is rejected.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Record boundary rule for a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// Every newline-terminated, non-blank line is a record.
    Line,
    /// A count line followed by that many newline-terminated items.
    CountedBatch,
}

/// One complete wire record, without its final terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The record as text; invalid UTF-8 sequences are replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Offsets of the batch currently being collected.
#[derive(Debug, Clone, Copy)]
struct BatchProgress {
    /// Start of the count line.
    start: usize,
    declared: usize,
    items: usize,
    /// End of the last item line, before its terminator.
    end: usize,
}

/// Byte accumulator that splits a stream into [`Frame`]s.
#[derive(Debug)]
pub struct LineFramer {
    mode: FrameMode,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already examined for line breaks.
    scanned: usize,
    batch: Option<BatchProgress>,
    frames: VecDeque<Frame>,
    finished: bool,
}

impl LineFramer {
    pub fn new(mode: FrameMode) -> Self {
        Self {
            mode,
            buffer: Vec::new(),
            scanned: 0,
            batch: None,
            frames: VecDeque::new(),
            finished: false,
        }
    }

    /// Append a chunk and extract every record it completes.
    ///
    /// An empty chunk is end-of-stream and behaves like [`finish`](Self::finish).
    ///
    /// # Errors
    ///
    /// Returns `IpcError::FrameTooLarge` if the pending record exceeds
    /// [`MAX_BUFFER_SIZE`]. The oversized data is dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), IpcError> {
        if chunk.is_empty() {
            self.finish();
            return Ok(());
        }
        if self.finished {
            debug!("Ignoring {} bytes after end of stream", chunk.len());
            return Ok(());
        }

        self.buffer.extend_from_slice(chunk);

        match self.mode {
            FrameMode::Line => self.extract_lines(),
            FrameMode::CountedBatch => self.extract_batches(),
        }

        if self.buffer.len() > MAX_BUFFER_SIZE {
            let size = self.buffer.len();
            self.clear_buffer();
            return Err(IpcError::FrameTooLarge {
                size,
                max: MAX_BUFFER_SIZE,
            });
        }
        Ok(())
    }

    /// Next complete record, in stream order.
    pub fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Mark end-of-stream. Unterminated bytes are discarded, never promoted
    /// to a record. Returns the number of bytes dropped.
    pub fn finish(&mut self) -> usize {
        self.finished = true;
        let dropped = self.buffer.len();
        if dropped > 0 {
            debug!("Discarding {} unterminated bytes at end of stream", dropped);
        }
        self.clear_buffer();
        dropped
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes buffered towards a record that is not yet complete.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a counted batch has received some, but not all, of its items.
    pub fn has_partial_batch(&self) -> bool {
        self.batch.is_some_and(|batch| batch.items > 0)
    }

    /// Emit a partial batch with the items received so far.
    ///
    /// For backends whose count overstates the lines they send. Returns
    /// `false` when no batch has items pending.
    pub fn flush_batch(&mut self) -> bool {
        let Some(batch) = self.batch.filter(|batch| batch.items > 0) else {
            return false;
        };
        debug!(
            "Batch announced {} items but {} arrived, flushing",
            batch.declared, batch.items
        );
        self.frames
            .push_back(Frame::new(&self.buffer[batch.start..batch.end]));
        self.batch = None;
        self.buffer.drain(..self.scanned);
        self.scanned = 0;
        true
    }

    /// Drop queued frames and partial data but keep the stream open.
    /// Returns the number of bytes discarded.
    pub fn discard_pending(&mut self) -> usize {
        let queued: usize = self.frames.drain(..).map(|frame| frame.len()).sum();
        let dropped = queued + self.buffer.len();
        self.clear_buffer();
        dropped
    }

    /// Forget all buffered data and queued frames; ready for a new stream.
    pub fn reset(&mut self) {
        self.discard_pending();
        self.finished = false;
    }

    fn clear_buffer(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.batch = None;
    }

    fn extract_lines(&mut self) {
        let mut start = 0;
        let mut search_from = self.scanned;

        while let Some(offset) = self.buffer[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + offset;
            let line = trim_cr(&self.buffer[start..end]);
            if !is_blank(line) {
                self.frames.push_back(Frame::new(line));
            }
            start = end + 1;
            search_from = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
    }

    fn extract_batches(&mut self) {
        let mut consumed = 0;

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let line_start = self.scanned;
            let line_end = line_start + offset;
            self.scanned = line_end + 1;
            let line = trim_cr(&self.buffer[line_start..line_end]);

            match self.batch {
                None if is_blank(line) => consumed = self.scanned,
                None => match parse_count(line) {
                    Some(0) => {
                        self.frames.push_back(Frame::new(line));
                        consumed = self.scanned;
                    }
                    Some(declared) => {
                        self.batch = Some(BatchProgress {
                            start: line_start,
                            declared,
                            items: 0,
                            end: line_end,
                        });
                    }
                    None => {
                        debug!("Dropping {} bytes outside a counted batch", line.len());
                        consumed = self.scanned;
                    }
                },
                Some(_) if is_blank(line) => {}
                Some(mut batch) => {
                    batch.items += 1;
                    batch.end = line_end;
                    if batch.items < batch.declared {
                        self.batch = Some(batch);
                        continue;
                    }
                    self.frames
                        .push_back(Frame::new(&self.buffer[batch.start..batch.end]));
                    self.batch = None;
                    consumed = self.scanned;
                }
            }
        }

        self.buffer.drain(..consumed);
        self.scanned -= consumed;
        if let Some(batch) = self.batch.as_mut() {
            batch.start -= consumed;
            batch.end -= consumed;
        }
    }
}

fn parse_count(line: &[u8]) -> Option<usize> {
    std::str::from_utf8(line).ok()?.trim().parse().ok()
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn drain(framer: &mut LineFramer) -> Vec<String> {
        std::iter::from_fn(|| framer.next_frame())
            .map(|f| f.text().into_owned())
            .collect()
    }

    #[test]
    fn test_line_mode_splits_and_buffers_partial() {
        let mut framer = LineFramer::new(FrameMode::Line);
        framer.push(b"{\"a\":1}\n{\"b\"").unwrap();
        assert_eq!(drain(&mut framer), vec![r#"{"a":1}"#]);
        assert_eq!(framer.pending_bytes(), 4);

        framer.push(b":2}\r\n\n  \n").unwrap();
        assert_eq!(drain(&mut framer), vec![r#"{"b":2}"#]);
        assert_eq!(framer.pending_bytes(), 0);
    }

    #[test]
    fn test_line_mode_multiple_records_in_one_chunk() {
        let mut framer = LineFramer::new(FrameMode::Line);
        framer.push(b"one\ntwo\nthree\n").unwrap();
        assert_eq!(drain(&mut framer), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let text = "/home/zoë/naïve.txt\n";
        let bytes = text.as_bytes();
        // Split inside the two-byte 'ë'
        let split = text.find('ë').unwrap() + 1;

        let mut framer = LineFramer::new(FrameMode::Line);
        framer.push(&bytes[..split]).unwrap();
        assert!(framer.next_frame().is_none());
        framer.push(&bytes[split..]).unwrap();
        assert_eq!(drain(&mut framer), vec!["/home/zoë/naïve.txt"]);
    }

    #[test]
    fn test_batch_split_mid_path_reassembles() {
        let mut framer = LineFramer::new(FrameMode::CountedBatch);
        framer.push(b"1\n/home/a").unwrap();
        assert!(framer.next_frame().is_none());
        framer.push(b"lice/file.txt\n").unwrap();

        let frames = drain(&mut framer);
        assert_eq!(frames, vec!["1\n/home/alice/file.txt"]);
    }

    #[test]
    fn test_batch_header_only_waits_for_items() {
        let mut framer = LineFramer::new(FrameMode::CountedBatch);
        framer.push(b"2\n").unwrap();
        assert!(framer.next_frame().is_none());
        framer.push(b"/a/b.txt\n/c/d.png\n").unwrap();
        assert_eq!(drain(&mut framer), vec!["2\n/a/b.txt\n/c/d.png"]);
    }

    #[test]
    fn test_batch_zero_count_completes_immediately() {
        let mut framer = LineFramer::new(FrameMode::CountedBatch);
        framer.push(b"0\n").unwrap();
        assert_eq!(drain(&mut framer), vec!["0"]);
    }

    #[test]
    fn test_batch_split_at_line_boundary_waits_for_count() {
        let mut framer = LineFramer::new(FrameMode::CountedBatch);
        framer.push(b"2\n/a/b.txt\n").unwrap();
        assert!(framer.next_frame().is_none());
        assert!(framer.has_partial_batch());

        framer.push(b"/c/d.png\n").unwrap();
        assert_eq!(drain(&mut framer), vec!["2\n/a/b.txt\n/c/d.png"]);
        assert!(!framer.has_partial_batch());
        assert_eq!(framer.pending_bytes(), 0);
    }

    #[test]
    fn test_batches_in_one_chunk_are_split_by_count() {
        let mut framer = LineFramer::new(FrameMode::CountedBatch);
        framer
            .push(b"1\n/tmp/slow\n0\n2\n/tmp/a\n\n/tmp/b\n1\n/tmp/par")
            .unwrap();
        assert_eq!(
            drain(&mut framer),
            vec!["1\n/tmp/slow", "0", "2\n/tmp/a\n\n/tmp/b"]
        );

        framer.push(b"tial\n").unwrap();
        assert_eq!(drain(&mut framer), vec!["1\n/tmp/partial"]);
    }

    #[test]
    fn test_overstated_count_waits_until_flushed() {
        let mut framer = LineFramer::new(FrameMode::CountedBatch);
        framer.push(b"5\n/a/b.txt\n/c/d.png\n/e/f").unwrap();
        assert!(framer.next_frame().is_none());

        assert!(framer.flush_batch());
        assert_eq!(drain(&mut framer), vec!["5\n/a/b.txt\n/c/d.png"]);
        assert!(!framer.flush_batch());

        // The unterminated line is kept for the next batch
        framer.push(b"\n").unwrap();
        assert!(framer.next_frame().is_none());
        framer.push(b"1\n/g/h.txt\n").unwrap();
        assert_eq!(drain(&mut framer), vec!["1\n/g/h.txt"]);
    }

    #[test]
    fn test_header_only_batch_is_not_flushed() {
        let mut framer = LineFramer::new(FrameMode::CountedBatch);
        framer.push(b"3\n").unwrap();
        assert!(!framer.has_partial_batch());
        assert!(!framer.flush_batch());
        assert!(framer.next_frame().is_none());
    }

    #[test]
    fn test_line_without_count_is_dropped() {
        let mut framer = LineFramer::new(FrameMode::CountedBatch);
        framer.push(b"\n/tmp/orphan\n1\n/tmp/ok\n").unwrap();
        assert_eq!(drain(&mut framer), vec!["1\n/tmp/ok"]);
        assert_eq!(framer.pending_bytes(), 0);
    }

    #[test]
    fn test_discard_pending_keeps_stream_open() {
        let mut framer = LineFramer::new(FrameMode::CountedBatch);
        framer.push(b"1\n/tmp/old\n2\n/tmp/x\n").unwrap();
        assert_eq!(framer.discard_pending(), "1\n/tmp/old".len() + "2\n/tmp/x\n".len());
        assert!(framer.next_frame().is_none());
        assert!(!framer.is_finished());

        framer.push(b"1\n/tmp/new\n").unwrap();
        assert_eq!(drain(&mut framer), vec!["1\n/tmp/new"]);
    }

    #[test]
    fn test_eof_discards_partial_record() {
        let mut framer = LineFramer::new(FrameMode::Line);
        framer.push(b"complete\npartial").unwrap();
        assert_eq!(framer.finish(), 7);
        assert_eq!(drain(&mut framer), vec!["complete"]);
        assert!(framer.is_finished());
    }

    #[test]
    fn test_empty_chunk_is_end_of_stream() {
        let mut framer = LineFramer::new(FrameMode::CountedBatch);
        framer.push(b"1\n/tmp/x").unwrap();
        framer.push(b"").unwrap();
        assert!(framer.is_finished());
        assert_eq!(framer.pending_bytes(), 0);
        assert!(framer.next_frame().is_none());

        framer.push(b"\n").unwrap();
        assert!(framer.next_frame().is_none(), "no frames after end of stream");
    }

    #[test]
    fn test_reset_allows_new_stream() {
        let mut framer = LineFramer::new(FrameMode::Line);
        framer.push(b"stale\npart").unwrap();
        framer.finish();
        framer.reset();
        assert!(!framer.is_finished());
        assert!(framer.next_frame().is_none());
        framer.push(b"fresh\n").unwrap();
        assert_eq!(drain(&mut framer), vec!["fresh"]);
    }

    #[test]
    fn test_oversized_record_rejected() {
        let mut framer = LineFramer::new(FrameMode::Line);
        let chunk = vec![b'x'; MAX_BUFFER_SIZE + 1];
        let err = framer.push(&chunk).unwrap_err();
        assert!(matches!(err, IpcError::FrameTooLarge { .. }), "got {:?}", err);
        assert_eq!(framer.pending_bytes(), 0);
    }
}
