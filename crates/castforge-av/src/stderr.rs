//! Line splitting and bounded capture of a transcoder's standard error.
//!
//! ffmpeg rewrites its statistics line in place with `\r`, so both `\r` and
//! `\n` are treated as line breaks. Only the most recent output is retained:
//! a transcode that runs for hours must not accumulate its whole log.

use std::collections::VecDeque;

use futures::{future, Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};

/// Default number of stderr bytes kept for error reporting.
pub const DEFAULT_STDERR_LIMIT: usize = 16 * 1024;

/// Longest line emitted before an undelimited run is split.
pub const MAX_LINE_LENGTH: usize = 4 * 1024;

/// Splits on `\r` or `\n`, cutting lines longer than `max_length`.
#[derive(Debug, Clone, Copy)]
struct LineSplitter {
    max_length: usize,
}

impl Decoder for LineSplitter {
    type Item = BytesMut;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> std::io::Result<Option<BytesMut>> {
        let window = buf.len().min(self.max_length + 1);
        if let Some(pos) = buf[..window].iter().position(|b| *b == b'\r' || *b == b'\n') {
            let line = buf.split_to(pos);
            buf.advance(1);
            return Ok(Some(line));
        }
        if buf.len() >= self.max_length {
            return Ok(Some(buf.split_to(self.max_length)));
        }
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> std::io::Result<Option<BytesMut>> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None if buf.is_empty() => Ok(None),
            None => Ok(Some(buf.split())),
        }
    }
}

/// Split a stderr pipe into non-empty, lossily decoded lines.
pub fn lines<R>(reader: R) -> impl Stream<Item = String> + Unpin + Send
where
    R: AsyncRead + Unpin + Send,
{
    lines_with_max_length(reader, MAX_LINE_LENGTH)
}

fn lines_with_max_length<R>(reader: R, max_length: usize) -> impl Stream<Item = String> + Unpin + Send
where
    R: AsyncRead + Unpin + Send,
{
    let codec = LineSplitter {
        max_length: max_length.max(1),
    };
    FramedRead::new(reader, codec).filter_map(|frame| {
        let line = match frame {
            Ok(bytes) => {
                let line = String::from_utf8_lossy(&bytes).trim_end().to_string();
                (!line.is_empty()).then_some(line)
            }
            Err(e) => {
                tracing::debug!(error = %e, "stderr read failed");
                None
            }
        };
        future::ready(line)
    })
}

/// The last `limit` bytes (approximately, whole lines) of a process's stderr.
#[derive(Debug, Clone)]
pub struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
    limit: usize,
}

impl StderrTail {
    /// Create an empty tail retaining at most `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            limit: limit.max(1),
        }
    }

    /// Append a line, evicting the oldest lines once over the limit.
    pub fn push(&mut self, line: &str) {
        let mut line = line.to_string();
        if line.len() > self.limit {
            let mut cut = line.len() - self.limit;
            while !line.is_char_boundary(cut) {
                cut += 1;
            }
            line = line.split_off(cut);
        }

        self.bytes += line.len() + 1;
        self.lines.push_back(line);

        while self.bytes > self.limit + 1 && self.lines.len() > 1 {
            if let Some(evicted) = self.lines.pop_front() {
                self.bytes -= evicted.len() + 1;
            }
        }
    }

    /// Whether nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The retained text, newline separated.
    pub fn contents(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

impl Default for StderrTail {
    fn default() -> Self {
        Self::new(DEFAULT_STDERR_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_most_recent_lines() {
        let mut tail = StderrTail::new(12);
        tail.push("first line");
        tail.push("second");
        tail.push("third");
        assert_eq!(tail.contents(), "second\nthird");
    }

    #[test]
    fn tail_truncates_oversized_line() {
        let mut tail = StderrTail::new(4);
        tail.push("abcdefgh");
        assert_eq!(tail.contents(), "efgh");
    }

    #[test]
    fn empty_tail() {
        let tail = StderrTail::default();
        assert!(tail.is_empty());
        assert_eq!(tail.contents(), "");
    }

    #[tokio::test]
    async fn splits_on_carriage_returns() {
        let input: &[u8] = b"Duration: 00:00:10.00\nframe=1 time=00:00:01.00\rframe=2 time=00:00:02.00\r\n\nend";
        let collected: Vec<String> = lines(input).collect().await;
        assert_eq!(
            collected,
            vec![
                "Duration: 00:00:10.00",
                "frame=1 time=00:00:01.00",
                "frame=2 time=00:00:02.00",
                "end",
            ]
        );
    }

    #[tokio::test]
    async fn undelimited_output_is_split() {
        let input = vec![b'x'; 10_000];
        let collected: Vec<String> = lines_with_max_length(&input[..], 4096).collect().await;
        assert_eq!(
            collected.iter().map(String::len).collect::<Vec<_>>(),
            vec![4096, 4096, 1808]
        );
    }
}
