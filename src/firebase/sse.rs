use crate::error::RemoteError;

/// Longest line accepted before the stream is considered broken.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder. Chunks may split lines and
/// multi-byte characters anywhere.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, RemoteError> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        if self.buf.len() > MAX_LINE_BYTES {
            self.buf.clear();
            return Err(RemoteError::Malformed(format!(
                "line exceeds {MAX_LINE_BYTES} bytes without a newline"
            )));
        }
        Ok(events)
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if event.is_none() && data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: data.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_firebase_put() {
        let mut parser = SseParser::default();
        let events = parser
            .feed(b"event: put\ndata: {\"path\":\"/\",\"data\":\"ON\"}\n\n")
            .unwrap();
        assert_eq!(
            events,
            vec![SseEvent {
                event: "put".into(),
                data: r#"{"path":"/","data":"ON"}"#.into(),
            }]
        );
    }

    #[test]
    fn handles_split_chunks_and_crlf() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"event: keep-al").unwrap().is_empty());
        assert!(parser.feed(b"ive\r\ndata: nu").unwrap().is_empty());
        let events = parser.feed(b"ll\r\n\r\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "keep-alive");
        assert_eq!(events[0].data, "null");
    }

    #[test]
    fn joins_multiline_data_and_skips_comments() {
        let mut parser = SseParser::default();
        let events = parser
            .feed(b": ping\ndata: a\ndata: b\n\nevent: cancel\ndata:x\n\n")
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "a\nb");
        assert_eq!(events[1].event, "cancel");
        assert_eq!(events[1].data, "x");
    }

    #[test]
    fn blank_lines_alone_dispatch_nothing() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"\n\n\r\n").unwrap().is_empty());
    }

    #[test]
    fn unterminated_line_is_capped() {
        let mut parser = SseParser::default();
        let half = vec![b'a'; MAX_LINE_BYTES / 2 + 1];
        assert!(parser.feed(&half).unwrap().is_empty());
        assert!(matches!(
            parser.feed(&half),
            Err(RemoteError::Malformed(_))
        ));

        // The parser is usable again after the oversized line is dropped.
        let events = parser.feed(b"\nevent: put\ndata: {}\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "put");
    }

    #[test]
    fn long_lines_with_newlines_are_fine() {
        let mut parser = SseParser::default();
        let mut chunk = b"data: ".to_vec();
        chunk.extend(vec![b'x'; MAX_LINE_BYTES - 16]);
        chunk.extend_from_slice(b"\n\n");
        for _ in 0..3 {
            assert_eq!(parser.feed(&chunk).unwrap().len(), 1);
        }
    }
}
