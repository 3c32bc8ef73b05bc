//! Inbound framing: bytes to text to CRLF-delimited lines.
//!
//! ```text
//! PortReader ──bytes──> Utf8Decoder ──text──> LineFramer ──lines──> Stream
//! ```
//!
//! The stepper firmware terminates every status line with `\r\n`. Reads from
//! the serial port arrive in arbitrary chunks, so both the decoder and the
//! framer carry state across chunk boundaries.

use crate::port::{PortError, PortReader};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use tokio::io::AsyncReadExt;
use tracing::trace;

/// Line delimiter used by the device.
pub const DELIMITER: &str = "\r\n";

/// Splits a stream of text chunks into `\r\n`-delimited lines.
///
/// The buffer never contains a complete delimiter: every `\r\n` is split out
/// as soon as it is seen, even when its two characters arrive in different
/// chunks. `flush` consumes the framer, so a new one is needed per
/// connection.
#[derive(Debug, Default)]
pub struct LineFramer {
    container: String,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed, oldest first.
    ///
    /// The fragment after the last delimiter stays buffered.
    pub fn transform(&mut self, chunk: &str) -> Vec<String> {
        self.container.push_str(chunk);

        let Some(end) = self.container.rfind(DELIMITER) else {
            return Vec::new();
        };

        let remainder = self.container.split_off(end + DELIMITER.len());
        self.container.truncate(end);
        let lines = self.container.split(DELIMITER).map(str::to_owned).collect();
        self.container = remainder;
        lines
    }

    /// Emit whatever is buffered as the final line, even if it is empty.
    pub fn flush(self) -> String {
        self.container
    }

    /// Text received since the last delimiter.
    pub fn pending(&self) -> &str {
        &self.container
    }
}

/// Incremental UTF-8 decoder.
///
/// Multi-byte sequences split across reads are held back until complete;
/// invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::with_capacity(self.pending.len());
        let mut input: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    text.push_str(valid);
                    input = &[];
                    break;
                }
                Err(err) => {
                    let (valid, rest) = input.split_at(err.valid_up_to());
                    text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - input.len();
        self.pending.drain(..consumed);
        text
    }

    /// Decode whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

struct LineReader {
    reader: PortReader,
    decoder: Utf8Decoder,
    framer: Option<LineFramer>,
    ready: VecDeque<String>,
    buffer: Vec<u8>,
}

/// Turn a port reader into a lazy stream of lines.
///
/// Reads at most `buffer_size` bytes at a time. At end of input the stream
/// yields the framer's flushed remainder as a last line and then ends. A read
/// error is yielded once and also ends the stream.
pub fn read_lines(reader: PortReader, buffer_size: usize) -> BoxStream<'static, Result<String, PortError>> {
    let state = LineReader {
        reader,
        decoder: Utf8Decoder::new(),
        framer: Some(LineFramer::new()),
        ready: VecDeque::new(),
        buffer: vec![0u8; buffer_size.max(1)],
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.ready.pop_front() {
                return Some((Ok(line), st));
            }
            if st.framer.is_none() {
                return None;
            }

            match st.reader.read(&mut st.buffer).await {
                Ok(0) => {
                    trace!("Serial stream reached end of input");
                    let tail = st.decoder.finish();
                    if let Some(mut framer) = st.framer.take() {
                        st.ready.extend(framer.transform(&tail));
                        st.ready.push_back(framer.flush());
                    }
                }
                Ok(n) => {
                    let text = st.decoder.decode(&st.buffer[..n]);
                    if let Some(framer) = st.framer.as_mut() {
                        st.ready.extend(framer.transform(&text));
                    }
                }
                Err(e) => {
                    st.framer = None;
                    st.ready.clear();
                    return Some((Err(PortError::Io(e)), st));
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed(chunks: &[&str]) -> Vec<String> {
        let mut framer = LineFramer::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(framer.transform(chunk));
        }
        lines.push(framer.flush());
        lines
    }

    #[test]
    fn test_split_line_is_reassembled() {
        assert_eq!(feed(&["STAT", "US=5\r\nPOS"]), vec!["STATUS=5", "POS"]);
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut framer = LineFramer::new();
        let lines = framer.transform("one\r\ntwo\r\nthree\r\npart");
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert_eq!(framer.pending(), "part");
    }

    #[test]
    fn test_delimiter_across_chunk_boundary() {
        let mut framer = LineFramer::new();
        assert!(framer.transform("position = 12\r").is_empty());
        assert_eq!(framer.transform("\nnext"), vec!["position = 12"]);
        assert_eq!(framer.flush(), "next");
    }

    #[test]
    fn test_nothing_emitted_until_delimiter() {
        let mut framer = LineFramer::new();
        assert!(framer.transform("Stepper").is_empty());
        assert!(framer.transform(" tester").is_empty());
        assert_eq!(framer.transform(" ready\r\n"), vec!["Stepper tester ready"]);
        assert_eq!(framer.flush(), "");
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut framer = LineFramer::new();
        assert!(framer.transform("").is_empty());
        assert!(framer.transform("abc").is_empty());
        assert!(framer.transform("").is_empty());
        assert_eq!(framer.pending(), "abc");
    }

    #[test]
    fn test_bare_delimiter_is_empty_line() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.transform("\r\n\r\n"), vec!["", ""]);
        assert_eq!(framer.flush(), "");
    }

    #[test]
    fn test_lone_cr_and_lf_are_not_delimiters() {
        assert_eq!(feed(&["a\rb\nc\r\n"]), vec!["a\rb\nc", ""]);
        assert_eq!(feed(&["x\r\r\n"]), vec!["x\r", ""]);
    }

    #[test]
    fn test_decoder_joins_split_multibyte() {
        let mut decoder = Utf8Decoder::new();
        let bytes = "pos ── 5".as_bytes();
        // Split inside the first box-drawing character (3 bytes).
        let first = decoder.decode(&bytes[..5]);
        let second = decoder.decode(&bytes[5..]);
        assert_eq!(first, "pos ");
        assert_eq!(format!("{first}{second}"), "pos ── 5");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"ok\xFFok"), "ok\u{FFFD}ok");
    }

    #[test]
    fn test_decoder_flushes_truncated_sequence() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[b'a', 0xE2, 0x94]), "a");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn test_read_lines_flushes_at_end_of_input() {
        let reader = tokio_test::io::Builder::new()
            .read(b"STAT")
            .read(b"US=5\r\nPOS")
            .build();

        let lines: Vec<String> = read_lines(Box::new(reader), 1024)
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["STATUS=5", "POS"]);
    }

    #[tokio::test]
    async fn test_read_lines_empty_input_yields_one_empty_line() {
        let reader = tokio_test::io::Builder::new().build();
        let lines: Vec<String> = read_lines(Box::new(reader), 16)
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec![String::new()]);
    }

    #[tokio::test]
    async fn test_read_lines_small_buffer() {
        let reader = tokio_test::io::Builder::new()
            .read(b"Stepper ready\r\nposition = 40\r\n")
            .build();
        let lines: Vec<String> = read_lines(Box::new(reader), 3)
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["Stepper ready", "position = 40", ""]);
    }

    #[tokio::test]
    async fn test_read_lines_error_ends_stream() {
        let reader = tokio_test::io::Builder::new()
            .read(b"one\r\ntw")
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"))
            .build();

        let mut lines = read_lines(Box::new(reader), 64);
        assert_eq!(lines.next().await.unwrap().unwrap(), "one");
        assert!(matches!(lines.next().await, Some(Err(PortError::Io(_)))));
        assert!(lines.next().await.is_none());
    }
}
