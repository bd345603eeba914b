use std::time::Duration;

/// One dispatched `text/event-stream` frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFrame {
    pub event_type: String,
    pub data: String,
    pub last_event_id: Option<String>,
}

/// Incremental decoder for the `text/event-stream` wire format.
///
/// Chunks may split lines anywhere; complete frames are returned as soon as their blank
/// terminator line arrives.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
    data: String,
    event_type: String,
    last_event_id: Option<String>,
    retry: Option<Duration>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Reconnection delay requested by the server through a `retry:` field.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(position) = self.buffer.iter().position(|b| *b == b'\n' || *b == b'\r')
            else {
                break;
            };
            // A trailing CR may be the first half of CRLF.
            if self.buffer[position] == b'\r' && position + 1 == self.buffer.len() {
                break;
            }
            let terminator_len =
                if self.buffer[position] == b'\r' && self.buffer[position + 1] == b'\n' {
                    2
                } else {
                    1
                };
            let line: Vec<u8> = self.buffer.drain(..position + terminator_len).collect();
            let line = String::from_utf8_lossy(&line[..position]).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    fn process_line(&mut self, line: &str) -> Option<StreamFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "event" => self.event_type = value.to_string(),
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_string()),
            "retry" if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
                if let Ok(millis) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(millis));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<StreamFrame> {
        let event_type = std::mem::take(&mut self.event_type);
        if self.data.is_empty() {
            return None;
        }
        let mut data = std::mem::take(&mut self.data);
        if data.ends_with('\n') {
            data.pop();
        }
        Some(StreamFrame {
            event_type: if event_type.is_empty() {
                "message".to_string()
            } else {
                event_type
            },
            data,
            last_event_id: self.last_event_id.clone(),
        })
    }
}
