use crate::error::CodecError;
use crate::row::Row;

const ROWS_KEY: &[u8] = b"rows";

/// An event produced while consuming a view response body.
#[derive(Debug)]
pub enum RowEvent<'a> {
    Row(Row<'a>),
    Error(CodecError),
    /// The top-level object closed; `RowCodec::meta` is now available.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Header,
    Rows,
    Row,
    Trailer,
    Done,
    Failed,
}

/// Incremental splitter for a streamed view response.
///
/// Bytes are pushed with [`feed`](Self::feed) in chunks of any size and
/// events are pulled with [`next_event`](Self::next_event). Rows borrow the
/// codec's internal buffer, so a row must be copied if it is needed after the
/// next `feed`.
///
/// Everything outside the `rows` array is collected as metadata, with the
/// array itself reduced to `"rows":[]`.
#[derive(Debug)]
pub struct RowCodec {
    buf: Vec<u8>,
    pos: usize,
    // Bytes already discarded from the front of `buf`, for error offsets.
    offset: usize,
    phase: Phase,
    // Open brackets outside the rows array, innermost last.
    nesting: Vec<u8>,
    in_string: bool,
    escaped: bool,
    expect_key: bool,
    capturing_key: bool,
    key: Vec<u8>,
    row_start: usize,
    row_depth: usize,
    rows: usize,
    meta: Vec<u8>,
}

impl Default for RowCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl RowCodec {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            offset: 0,
            phase: Phase::Start,
            nesting: Vec::new(),
            in_string: false,
            escaped: false,
            expect_key: false,
            capturing_key: false,
            key: Vec::new(),
            row_start: 0,
            row_depth: 0,
            rows: 0,
            meta: Vec::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        if self.phase == Phase::Failed {
            return;
        }

        // Only a partially scanned row has to survive compaction.
        let keep_from = if self.phase == Phase::Row {
            self.row_start
        } else {
            self.pos
        };
        if keep_from > 0 {
            self.buf.drain(..keep_from);
            self.pos -= keep_from;
            self.offset += keep_from;
            if self.phase == Phase::Row {
                self.row_start = 0;
            }
        }
        self.buf.extend_from_slice(bytes);
    }

    pub fn next_event(&mut self) -> Option<RowEvent<'_>> {
        while self.pos < self.buf.len() {
            let b = self.buf[self.pos];
            let at = self.offset + self.pos;
            self.pos += 1;

            match self.phase {
                Phase::Failed => return None,
                Phase::Done => {
                    if !b.is_ascii_whitespace() {
                        return Some(self.fail(CodecError::TrailingData(at)));
                    }
                }
                Phase::Start => {
                    if b.is_ascii_whitespace() {
                        continue;
                    }
                    if b != b'{' {
                        return Some(self.fail(CodecError::NotAnObject(b as char, at)));
                    }
                    self.meta.push(b);
                    self.nesting.push(b);
                    self.expect_key = true;
                    self.phase = Phase::Header;
                }
                Phase::Header | Phase::Trailer => {
                    self.meta.push(b);
                    if self.in_string {
                        let closed = self.string_byte(b);
                        if self.capturing_key {
                            if closed {
                                self.capturing_key = false;
                            } else {
                                self.key.push(b);
                            }
                        }
                        continue;
                    }
                    match b {
                        b'"' => {
                            self.in_string = true;
                            self.capturing_key = self.nesting.len() == 1 && self.expect_key;
                            if self.capturing_key {
                                self.key.clear();
                            }
                        }
                        b'[' if self.phase == Phase::Header
                            && self.nesting.len() == 1
                            && !self.expect_key
                            && self.key == ROWS_KEY =>
                        {
                            self.phase = Phase::Rows;
                        }
                        b'{' | b'[' => self.nesting.push(b),
                        b'}' | b']' => {
                            let opener = if b == b'}' { b'{' } else { b'[' };
                            if self.nesting.pop() != Some(opener) {
                                return Some(self.fail(CodecError::Unbalanced(b as char, at)));
                            }
                            if self.nesting.is_empty() {
                                self.phase = Phase::Done;
                                return Some(RowEvent::Complete);
                            }
                        }
                        b':' if self.nesting.len() == 1 => self.expect_key = false,
                        b',' if self.nesting.len() == 1 => self.expect_key = true,
                        _ => {}
                    }
                }
                Phase::Rows => match b {
                    b',' => {}
                    b if b.is_ascii_whitespace() => {}
                    b'{' => {
                        self.row_start = self.pos - 1;
                        self.row_depth = 1;
                        self.phase = Phase::Row;
                    }
                    b']' => {
                        self.meta.push(b);
                        self.phase = Phase::Trailer;
                    }
                    other => {
                        return Some(self.fail(CodecError::UnexpectedByte(other as char, at)));
                    }
                },
                Phase::Row => {
                    if self.in_string {
                        self.string_byte(b);
                        continue;
                    }
                    match b {
                        b'"' => self.in_string = true,
                        b'{' | b'[' => self.row_depth += 1,
                        b'}' | b']' => {
                            self.row_depth -= 1;
                            if self.row_depth == 0 {
                                self.phase = Phase::Rows;
                                self.rows += 1;
                                let raw = &self.buf[self.row_start..self.pos];
                                return Some(RowEvent::Row(Row::new(raw)));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        None
    }

    /// True once the top-level object has closed cleanly.
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn is_failed(&self) -> bool {
        self.phase == Phase::Failed
    }

    /// Trailing metadata, available only after [`RowEvent::Complete`].
    pub fn meta(&self) -> Option<&[u8]> {
        self.is_complete().then_some(self.meta.as_slice())
    }

    /// Number of rows emitted so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    // Returns true when `b` closes the current string.
    fn string_byte(&mut self, b: u8) -> bool {
        if self.escaped {
            self.escaped = false;
        } else if b == b'\\' {
            self.escaped = true;
        } else if b == b'"' {
            self.in_string = false;
            return true;
        }
        false
    }

    fn fail(&mut self, error: CodecError) -> RowEvent<'static> {
        self.phase = Phase::Failed;
        self.buf.clear();
        self.pos = 0;
        RowEvent::Error(error)
    }
}
