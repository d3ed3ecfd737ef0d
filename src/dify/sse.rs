//! Server-sent-event line framing.
//!
//! Only `data:` lines matter. A `data: [DONE]` line ends the stream; other
//! lines (comments, `event:`, blank keep-alives) are dropped.

/// One meaningful line of an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload of a `data:` line, whitespace-trimmed.
    Data(String),
    /// The `[DONE]` terminator.
    Done,
}

/// Classify a single line.
pub fn parse_line(line: &str) -> Option<Frame> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        Some(Frame::Done)
    } else if payload.is_empty() {
        None
    } else {
        Some(Frame::Data(payload.to_string()))
    }
}

/// Reassembles lines from arbitrarily split byte chunks.
///
/// Bytes are buffered until a `\n` arrives so that multi-byte UTF-8
/// sequences split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(frame) = decode(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing line that had no newline.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.buf.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buf);
        decode(&line)
    }
}

fn decode(raw: &[u8]) -> Option<Frame> {
    let line = String::from_utf8_lossy(raw);
    parse_line(line.trim_end_matches(['\n', '\r']))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_lines() {
        assert_eq!(parse_line("data: {\"a\":1}"), Some(Frame::Data("{\"a\":1}".into())));
        assert_eq!(parse_line("data:{\"a\":1}"), Some(Frame::Data("{\"a\":1}".into())));
        assert_eq!(parse_line("data: [DONE]"), Some(Frame::Done));
    }

    #[test]
    fn ignores_other_lines() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("event: ping"), None);
        assert_eq!(parse_line(": keep-alive"), None);
        assert_eq!(parse_line("data:   "), None);
    }

    #[test]
    fn reassembles_split_lines() {
        let mut dec = LineDecoder::new();
        assert!(dec.push(b"data: {\"ans").is_empty());
        let frames = dec.push(b"wer\":\"hi\"}\r\n\ndata: [DO");
        assert_eq!(frames, vec![Frame::Data("{\"answer\":\"hi\"}".into())]);
        assert_eq!(dec.push(b"NE]\n"), vec![Frame::Done]);
        assert_eq!(dec.finish(), None);
    }

    #[test]
    fn keeps_utf8_split_across_chunks() {
        let line = "data: {\"answer\":\"事業\"}\n".as_bytes();
        // Split in the middle of the first multi-byte character.
        let cut = line.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let mut dec = LineDecoder::new();
        assert!(dec.push(&line[..cut]).is_empty());
        let frames = dec.push(&line[cut..]);
        assert_eq!(frames, vec![Frame::Data("{\"answer\":\"事業\"}".into())]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut dec = LineDecoder::new();
        assert!(dec.push(b"data: {\"x\":1}").is_empty());
        assert_eq!(dec.finish(), Some(Frame::Data("{\"x\":1}".into())));
    }
}
