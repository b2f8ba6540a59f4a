use bytes::Bytes;

/// Chunk-boundary-tolerant line splitter over a byte stream.
///
/// Feed raw chunks with [`SseLineReader::push_bytes`]; each call yields the
/// logical lines completed so far (split on `\r?\n`). At end of stream,
/// [`SseLineReader::finish`] yields the final unterminated fragment if it is
/// non-empty. The reader is finite; it does not support restart.
#[derive(Debug, Default)]
pub struct SseLineReader {
    buffer: String,
}

impl SseLineReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<String> {
        // Non-UTF-8 chunks cannot carry SSE fields; drop them rather than
        // poison the buffer.
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut lines = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }

        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buffer);
        if line.ends_with('\r') {
            line.pop();
        }
        if line.is_empty() { None } else { Some(line) }
    }
}

/// Returns the payload of a `data:` line, with the customary single leading
/// space trimmed.
pub fn data_payload(line: &str) -> Option<&str> {
    let value = line.strip_prefix("data:")?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_across_chunk_boundaries() {
        let mut reader = SseLineReader::new();
        assert!(reader.push_str("data: {\"a\":").is_empty());
        let lines = reader.push_str("1}\ndata: done\n");
        assert_eq!(lines, vec!["data: {\"a\":1}", "data: done"]);
    }

    #[test]
    fn handles_crlf() {
        let mut reader = SseLineReader::new();
        let lines = reader.push_str("event: error\r\ndata: x\r\n\r\n");
        assert_eq!(lines, vec!["event: error", "data: x", ""]);
    }

    #[test]
    fn crlf_split_between_chunks() {
        let mut reader = SseLineReader::new();
        assert!(reader.push_str("data: a\r").is_empty());
        assert_eq!(reader.push_str("\ndata: b\n"), vec!["data: a", "data: b"]);
    }

    #[test]
    fn final_unterminated_line_yields_at_eof() {
        let mut reader = SseLineReader::new();
        assert!(reader.push_str("data: tail").is_empty());
        assert_eq!(reader.finish(), Some("data: tail".to_string()));
        assert_eq!(reader.finish(), None);
    }

    #[test]
    fn final_empty_fragment_is_dropped() {
        let mut reader = SseLineReader::new();
        reader.push_str("data: x\n");
        assert_eq!(reader.finish(), None);
    }

    #[test]
    fn data_payload_trims_one_space() {
        assert_eq!(data_payload("data: hello"), Some("hello"));
        assert_eq!(data_payload("data:hello"), Some("hello"));
        assert_eq!(data_payload("data:  two"), Some(" two"));
        assert_eq!(data_payload("event: x"), None);
    }
}
