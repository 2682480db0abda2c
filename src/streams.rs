// EmberCL Streams - Output Capability
//
// The core only writes: primitives hand it an opaque stream handle exposing
// write-string/write-char/terpri/fresh-line. Transports live outside; the
// built-in sinks are the standard process streams and in-memory strings.

use std::io::{self, Write};

use crate::fastmap;

/// Stream identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u32);

#[derive(Debug)]
pub enum Stream {
    Stdout,
    Stderr,
    /// Accumulates output into a string (GET-OUTPUT-STREAM-STRING drains it)
    StringOutput { buffer: String },
}

pub struct StreamManager {
    streams: Vec<Option<Stream>>,
    free_list: Vec<u32>,
    /// Current column per stream, driving fresh-line
    column_positions: fastmap::HashMap<u32, usize>,
}

impl StreamManager {
    pub fn new() -> Self {
        let mut manager = Self {
            streams: Vec::new(),
            free_list: Vec::new(),
            column_positions: fastmap::HashMap::default(),
        };

        // Standard streams get fixed ids 0 and 1
        let _stdout = manager.alloc(Stream::Stdout);
        let _stderr = manager.alloc(Stream::Stderr);

        manager
    }

    pub fn stdout_id(&self) -> StreamId {
        StreamId(0)
    }

    pub fn stderr_id(&self) -> StreamId {
        StreamId(1)
    }

    pub fn alloc(&mut self, stream: Stream) -> StreamId {
        if let Some(id) = self.free_list.pop() {
            self.streams[id as usize] = Some(stream);
            StreamId(id)
        } else {
            let id = self.streams.len() as u32;
            self.streams.push(Some(stream));
            StreamId(id)
        }
    }

    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(id.0 as usize).and_then(|s| s.as_ref())
    }

    fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(id.0 as usize).and_then(|s| s.as_mut())
    }

    /// Close a non-standard stream, releasing its slot.
    pub fn close(&mut self, id: StreamId) -> bool {
        if id.0 <= 1 {
            return false;
        }
        if let Some(slot) = self.streams.get_mut(id.0 as usize) {
            if slot.is_some() {
                *slot = None;
                self.free_list.push(id.0);
                self.column_positions.remove(&id.0);
                return true;
            }
        }
        false
    }

    pub fn write_string(&mut self, id: StreamId, s: &str) -> io::Result<()> {
        let col = self.column_positions.entry(id.0).or_insert(0);
        for c in s.chars() {
            if c == '\n' {
                *col = 0;
            } else {
                *col += 1;
            }
        }

        match self.get_mut(id) {
            Some(Stream::Stdout) => {
                print!("{}", s);
                io::stdout().flush()
            }
            Some(Stream::Stderr) => {
                eprint!("{}", s);
                io::stderr().flush()
            }
            Some(Stream::StringOutput { buffer }) => {
                buffer.push_str(s);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not an open output stream",
            )),
        }
    }

    pub fn write_char(&mut self, id: StreamId, c: char) -> io::Result<()> {
        self.write_string(id, &c.to_string())
    }

    /// TERPRI: unconditional newline.
    pub fn terpri(&mut self, id: StreamId) -> io::Result<()> {
        self.write_string(id, "\n")
    }

    /// FRESH-LINE: newline only when not at column 0; reports whether one
    /// was written.
    pub fn fresh_line(&mut self, id: StreamId) -> io::Result<bool> {
        let col = *self.column_positions.get(&id.0).unwrap_or(&0);
        if col != 0 {
            self.terpri(id)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Drain the accumulated string from a string output stream.
    pub fn get_output_stream_string(&mut self, id: StreamId) -> Option<String> {
        match self.get_mut(id) {
            Some(Stream::StringOutput { buffer }) => {
                let result = buffer.clone();
                buffer.clear();
                Some(result)
            }
            _ => None,
        }
    }
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}
