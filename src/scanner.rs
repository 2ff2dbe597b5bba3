//! Incremental frame scanner.
//!
//! `FrameScanner` turns an arbitrarily chunked byte stream into candidate frames
//! bounded by a start marker (0x01) and an end marker (0x05). It is an explicit
//! two-state machine (`Idle`, `InFrame`) over an owned buffer, so feeding a stream
//! in one call or split across many calls yields the same frames.
//!
//! # Example
//!
//! ```
//! use framelog_polars::scanner::FrameScanner;
//!
//! let mut scanner = FrameScanner::new();
//! let mut frames: Vec<Vec<u8>> = scanner.feed(&[0xff, 0x01, 0x10]).collect();
//! frames.extend(scanner.feed(&[0x02, 0x05, 0x00]));
//! assert_eq!(frames, vec![vec![0x01, 0x10, 0x02, 0x05]]);
//! ```

use crate::schema::SchemaRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Byte that opens a frame.
pub const START_MARKER: u8 = 0x01;
/// Byte that closes a frame.
pub const END_MARKER: u8 = 0x05;

/// Default upper bound on the size of an unterminated frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// What to do with a start marker seen while already inside a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncPolicy {
    /// Abandon the partial frame and start a new one at this byte.
    Restart,
    /// Keep accumulating; validation rejects malformed frames later.
    #[default]
    Ignore,
}

/// How the end of a frame is found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Count the schema-declared length for known IDs; end marker otherwise.
    #[default]
    DeclaredLength,
    /// The first end marker byte always closes the frame.
    EndMarker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    /// `expected` is set once the ID byte maps to a declared frame length.
    InFrame { expected: Option<usize> },
}

/// Stateful byte-stream to frame converter. One instance per stream.
#[derive(Debug, Clone)]
pub struct FrameScanner {
    buffer: Vec<u8>,
    state: State,
    resync: ResyncPolicy,
    declared_lengths: HashMap<u8, usize>,
    max_frame_len: usize,
    abandoned: u64,
    /// Bytes of a misaligned counted frame, rescanned before new input.
    replay: VecDeque<u8>,
}

impl FrameScanner {
    /// Creates an end-marker scanner with the default resync policy.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
            state: State::Idle,
            resync: ResyncPolicy::default(),
            declared_lengths: HashMap::new(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            abandoned: 0,
            replay: VecDeque::new(),
        }
    }

    /// Creates a scanner that counts schema-declared frame lengths for known IDs.
    pub fn with_declared_lengths(registry: &SchemaRegistry) -> Self {
        let mut scanner = Self::new();
        scanner.declared_lengths = registry
            .schemas()
            .into_iter()
            .filter_map(|s| s.length.map(|len| (s.id, len)))
            .collect();
        scanner
    }

    /// Sets the resync policy.
    pub fn with_resync(mut self, resync: ResyncPolicy) -> Self {
        self.resync = resync;
        self
    }

    /// Sets the size at which an unterminated frame is abandoned.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len.max(2);
        self
    }

    /// Returns the configured resync policy.
    pub fn resync(&self) -> ResyncPolicy {
        self.resync
    }

    /// Returns true while a partial frame is buffered.
    pub fn in_frame(&self) -> bool {
        matches!(self.state, State::InFrame { .. })
    }

    /// Number of frames abandoned for exceeding the maximum frame length.
    pub fn abandoned_frames(&self) -> u64 {
        self.abandoned
    }

    /// Feeds a chunk of bytes and returns a lazy iterator over the completed frames.
    ///
    /// Bytes are consumed only as the iterator advances, so it must be drained
    /// before the next call to `feed`.
    pub fn feed<'s, 'b>(&'s mut self, bytes: &'b [u8]) -> Frames<'s, 'b> {
        Frames {
            scanner: self,
            input: bytes.iter(),
        }
    }

    /// Discards any incomplete frame at end of stream.
    pub fn flush(&mut self) {
        self.buffer.clear();
        self.replay.clear();
        self.state = State::Idle;
    }

    fn push_byte(&mut self, byte: u8) -> Option<Vec<u8>> {
        match self.state {
            State::Idle => {
                if byte == START_MARKER {
                    self.begin();
                }
                None
            }
            State::InFrame {
                expected: Some(len),
            } => {
                self.buffer.push(byte);
                if self.buffer.len() < len {
                    return None;
                }
                let frame = self.take_frame();
                if byte != END_MARKER {
                    // Misaligned: the decoder rejects this frame, and the next
                    // start marker may sit anywhere after its first byte.
                    for &b in frame[1..].iter().rev() {
                        self.replay.push_front(b);
                    }
                }
                Some(frame)
            }
            State::InFrame { expected: None } => {
                self.buffer.push(byte);

                // The byte after the start marker is the packet ID.
                if self.buffer.len() == 2 {
                    if let Some(&len) = self.declared_lengths.get(&byte) {
                        self.state = State::InFrame {
                            expected: Some(len),
                        };
                        return None;
                    }
                }

                if byte == END_MARKER {
                    Some(self.take_frame())
                } else if byte == START_MARKER && self.resync == ResyncPolicy::Restart {
                    self.begin();
                    None
                } else {
                    if self.buffer.len() >= self.max_frame_len {
                        self.abandoned += 1;
                        self.flush();
                    }
                    None
                }
            }
        }
    }

    fn begin(&mut self) {
        self.buffer.clear();
        self.buffer.push(START_MARKER);
        self.state = State::InFrame { expected: None };
    }

    fn take_frame(&mut self) -> Vec<u8> {
        let frame = self.buffer.clone();
        self.buffer.clear();
        self.state = State::Idle;
        frame
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy iterator over the frames completed by one `feed` call.
pub struct Frames<'s, 'b> {
    scanner: &'s mut FrameScanner,
    input: std::slice::Iter<'b, u8>,
}

impl<'s, 'b> Frames<'s, 'b> {
    /// Bytes of the fed chunk not yet consumed.
    pub fn remaining(&self) -> usize {
        self.input.len()
    }
}

impl<'s, 'b> Iterator for Frames<'s, 'b> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let byte = match self.scanner.replay.pop_front() {
                Some(byte) => byte,
                None => *self.input.next()?,
            };
            if let Some(frame) = self.scanner.push_byte(byte) {
                return Some(frame);
            }
        }
    }
}
