//! Incremental JSON extraction over streamed response bodies.
//!
//! The extractor is configured with JSON-pointer paths, optionally ending in
//! the wildcard segment `^` which matches each element of an array
//! (`/records/^` yields one value per record as soon as it is complete).
//! `feed` accepts partial body text and returns the `(path, value)` pairs
//! completed since the previous call, in document order. Tokens spanning a
//! chunk boundary are buffered and re-scanned on the next feed, the same way
//! the SSE stream parser buffers partial lines.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsonStreamError {
    #[error("malformed JSON: {0}")]
    Malformed(String),
    #[error("invalid UTF-8 in response body")]
    InvalidUtf8,
    #[error("parser previously failed")]
    Failed,
}

/// Reassembles UTF-8 text from byte chunks that may split multi-byte
/// sequences. Returns the decodable prefix, carrying the remainder.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    carry: Vec<u8>,
}

impl Utf8Chunker {
    pub fn push(&mut self, bytes: &[u8]) -> Result<String, JsonStreamError> {
        self.carry.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => return Err(JsonStreamError::InvalidUtf8),
        };
        let text = String::from_utf8_lossy(&self.carry[..valid]).into_owned();
        self.carry.drain(..valid);
        Ok(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Wildcard,
}

#[derive(Debug)]
struct PathPattern {
    source: String,
    segments: Vec<Segment>,
}

fn compile(path: &str) -> PathPattern {
    let segments = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s == "^" {
                Segment::Wildcard
            } else {
                Segment::Key(s.to_string())
            }
        })
        .collect();
    PathPattern {
        source: path.to_string(),
        segments,
    }
}

#[derive(Debug)]
enum Frame {
    /// `key` holds the member whose value is currently being parsed.
    Object { key: Option<String> },
    Array { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    /// Just after `[`: either the first element or an immediate `]`.
    ValueOrClose,
    KeyOrClose,
    Colon,
    CommaOrClose,
    Done,
}

#[derive(Debug)]
struct Capture {
    start: usize,
    pattern: usize,
    depth: usize,
}

/// Streaming extractor for one response body.
#[derive(Debug)]
pub struct JsonExtractor {
    patterns: Vec<PathPattern>,
    buf: String,
    pos: usize,
    stack: Vec<Frame>,
    expect: Expect,
    capture: Option<Capture>,
    failed: bool,
}

impl JsonExtractor {
    pub fn new(paths: &[&str]) -> Self {
        Self {
            patterns: paths.iter().map(|p| compile(p)).collect(),
            buf: String::new(),
            pos: 0,
            stack: Vec::new(),
            expect: Expect::Value,
            capture: None,
            failed: false,
        }
    }

    /// Feed the next piece of body text. Returns every `(path, value)` pair
    /// completed by this chunk, in document order.
    pub fn feed(&mut self, chunk: &str) -> Result<Vec<(String, Value)>, JsonStreamError> {
        if self.failed {
            return Err(JsonStreamError::Failed);
        }
        self.buf.push_str(chunk);
        let result = self.scan();
        if result.is_err() {
            self.failed = true;
        } else {
            self.compact();
        }
        result
    }

    fn scan(&mut self) -> Result<Vec<(String, Value)>, JsonStreamError> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            if self.pos >= self.buf.len() {
                return Ok(out);
            }
            let tok_start = self.pos;
            let c = self.byte_at(self.pos);
            match self.expect {
                Expect::Value | Expect::ValueOrClose => {
                    if self.expect == Expect::ValueOrClose && c == b']' {
                        self.pos += 1;
                        self.stack.pop();
                        self.value_finished(&mut out)?;
                        continue;
                    }
                    self.begin_value();
                    match c {
                        b'{' => {
                            self.pos += 1;
                            self.stack.push(Frame::Object { key: None });
                            self.expect = Expect::KeyOrClose;
                        }
                        b'[' => {
                            self.pos += 1;
                            self.stack.push(Frame::Array { index: 0 });
                            self.expect = Expect::ValueOrClose;
                        }
                        b'"' => match self.scan_string(self.pos) {
                            Some(end) => {
                                self.pos = end;
                                self.value_finished(&mut out)?;
                            }
                            None => return self.incomplete(tok_start, out),
                        },
                        b'-' | b'0'..=b'9' => match self.scan_number(self.pos) {
                            Some(end) => {
                                self.pos = end;
                                self.value_finished(&mut out)?;
                            }
                            None => return self.incomplete(tok_start, out),
                        },
                        b't' | b'f' | b'n' => {
                            let lit = match c {
                                b't' => "true",
                                b'f' => "false",
                                _ => "null",
                            };
                            match self.scan_literal(self.pos, lit)? {
                                Some(end) => {
                                    self.pos = end;
                                    self.value_finished(&mut out)?;
                                }
                                None => return self.incomplete(tok_start, out),
                            }
                        }
                        _ => return Err(self.unexpected(c)),
                    }
                }
                Expect::KeyOrClose => match c {
                    b'}' => {
                        self.pos += 1;
                        self.stack.pop();
                        self.value_finished(&mut out)?;
                    }
                    b'"' => match self.scan_string(self.pos) {
                        Some(end) => {
                            let key: String = serde_json::from_str(&self.buf[self.pos..end])
                                .map_err(|e| JsonStreamError::Malformed(e.to_string()))?;
                            self.pos = end;
                            if let Some(Frame::Object { key: slot }) = self.stack.last_mut() {
                                *slot = Some(key);
                            }
                            self.expect = Expect::Colon;
                        }
                        None => return self.incomplete(tok_start, out),
                    },
                    _ => return Err(self.unexpected(c)),
                },
                Expect::Colon => {
                    if c == b':' {
                        self.pos += 1;
                        self.expect = Expect::Value;
                    } else {
                        return Err(self.unexpected(c));
                    }
                }
                Expect::CommaOrClose => match (c, self.stack.last_mut()) {
                    (b',', Some(Frame::Object { .. })) => {
                        self.pos += 1;
                        self.expect = Expect::KeyOrClose;
                    }
                    (b',', Some(Frame::Array { index })) => {
                        *index += 1;
                        self.pos += 1;
                        self.expect = Expect::Value;
                    }
                    (b'}', Some(Frame::Object { .. })) => {
                        self.pos += 1;
                        self.stack.pop();
                        self.value_finished(&mut out)?;
                    }
                    (b']', Some(Frame::Array { .. })) => {
                        self.pos += 1;
                        self.stack.pop();
                        self.value_finished(&mut out)?;
                    }
                    _ => return Err(self.unexpected(c)),
                },
                Expect::Done => return Err(self.unexpected(c)),
            }
        }
    }

    /// Mark the start of a value: if its path matches a configured pattern
    /// and no capture is active, begin capturing its source text.
    fn begin_value(&mut self) {
        if self.capture.is_some() {
            return;
        }
        if let Some(pattern) = self.match_path() {
            self.capture = Some(Capture {
                start: self.pos,
                pattern,
                depth: self.stack.len(),
            });
        }
    }

    fn value_finished(&mut self, out: &mut Vec<(String, Value)>) -> Result<(), JsonStreamError> {
        if let Some(cap) = &self.capture {
            if self.stack.len() == cap.depth {
                let text = &self.buf[cap.start..self.pos];
                let value: Value = serde_json::from_str(text)
                    .map_err(|e| JsonStreamError::Malformed(e.to_string()))?;
                out.push((self.patterns[cap.pattern].source.clone(), value));
                self.capture = None;
            }
        }
        match self.stack.last_mut() {
            None => self.expect = Expect::Done,
            Some(Frame::Object { key }) => {
                *key = None;
                self.expect = Expect::CommaOrClose;
            }
            Some(Frame::Array { .. }) => self.expect = Expect::CommaOrClose,
        }
        Ok(())
    }

    fn match_path(&self) -> Option<usize> {
        'pattern: for (i, pat) in self.patterns.iter().enumerate() {
            if pat.segments.len() != self.stack.len() {
                continue;
            }
            for (seg, frame) in pat.segments.iter().zip(self.stack.iter()) {
                match (seg, frame) {
                    (Segment::Key(k), Frame::Object { key: Some(fk) }) if k == fk => {}
                    (Segment::Wildcard, Frame::Array { .. }) => {}
                    _ => continue 'pattern,
                }
            }
            return Some(i);
        }
        None
    }

    /// Scan a string token starting at the opening quote. Returns the byte
    /// offset just past the closing quote, or None if it continues beyond
    /// the buffered input.
    fn scan_string(&self, start: usize) -> Option<usize> {
        let mut escaped = false;
        for (i, ch) in self.buf[start + 1..].char_indices() {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                return Some(start + 1 + i + 1);
            }
        }
        None
    }

    /// Scan a number token. None if the number may continue into the next
    /// chunk (it ends flush with the buffer).
    fn scan_number(&self, start: usize) -> Option<usize> {
        let bytes = self.buf.as_bytes();
        let mut end = start;
        while end < bytes.len()
            && matches!(bytes[end], b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        {
            end += 1;
        }
        if end == bytes.len() {
            None
        } else {
            Some(end)
        }
    }

    fn scan_literal(&self, start: usize, lit: &str) -> Result<Option<usize>, JsonStreamError> {
        let avail = &self.buf[start..];
        if avail.len() < lit.len() {
            return if lit.starts_with(avail) {
                Ok(None)
            } else {
                Err(JsonStreamError::Malformed(format!(
                    "unexpected token near '{}'",
                    avail
                )))
            };
        }
        // Byte comparison: the buffer may hold arbitrary text here.
        if avail.as_bytes()[..lit.len()] == *lit.as_bytes() {
            Ok(Some(start + lit.len()))
        } else {
            let context: String = avail.chars().take(8).collect();
            Err(JsonStreamError::Malformed(format!(
                "unexpected token near '{}'",
                context
            )))
        }
    }

    fn incomplete(
        &mut self,
        tok_start: usize,
        out: Vec<(String, Value)>,
    ) -> Result<Vec<(String, Value)>, JsonStreamError> {
        self.pos = tok_start;
        Ok(out)
    }

    fn unexpected(&self, c: u8) -> JsonStreamError {
        JsonStreamError::Malformed(format!("unexpected character '{}'", c as char))
    }

    fn skip_ws(&mut self) {
        let bytes = self.buf.as_bytes();
        while self.pos < bytes.len()
            && matches!(bytes[self.pos], b' ' | b'\t' | b'\n' | b'\r')
        {
            self.pos += 1;
        }
    }

    fn byte_at(&self, i: usize) -> u8 {
        self.buf.as_bytes()[i]
    }

    /// Drop consumed input, keeping any active capture's source text.
    fn compact(&mut self) {
        let keep_from = match &self.capture {
            Some(cap) => cap.start,
            None => self.pos,
        };
        if keep_from == 0 {
            return;
        }
        self.buf.drain(..keep_from);
        self.pos -= keep_from;
        if let Some(cap) = &mut self.capture {
            cap.start = 0;
        }
    }
}
