//! Output sink and buffering stack (spec §6 "Output", §9 "Output sink with
//! buffering stack").
//!
//! All script-produced output — raw template chunks, `echo`/`print`, the
//! `CONSUME` opcode in general — flows through whichever sink is on top of
//! this stack. Pushing a buffer starts capturing; popping it flushes the
//! captured bytes into the sink beneath, mirroring `ob_start()`/`ob_get_
//! clean()`-style output buffering.

use std::io::Write;

/// A host-provided consumer of script output (spec §6 "default output
/// consumer").
pub trait OutputConsumer {
    fn consume(&mut self, bytes: &[u8]);
}

/// Writes straight to the process's stdout, the engine's default consumer.
pub struct StdoutConsumer;

impl OutputConsumer for StdoutConsumer {
    fn consume(&mut self, bytes: &[u8]) {
        let _ = std::io::stdout().write_all(bytes);
    }
}

/// An in-memory buffer, used both as a capturing output-buffer-stack entry
/// and as a host consumer an embedder can read back from after `execute`
/// returns.
#[derive(Default)]
pub struct BufferConsumer {
    pub bytes: Vec<u8>,
}

impl OutputConsumer for BufferConsumer {
    fn consume(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }
}

enum Sink {
    Root(Box<dyn OutputConsumer>),
    Buffer(Vec<u8>),
}

/// A stack of output sinks. `CONSUME` always writes to the top entry.
/// `push_buffer`/`pop_buffer` implement explicit output buffering; popping
/// flushes into whatever is beneath.
pub struct OutputStack {
    sinks: Vec<Sink>,
    total_bytes: u64,
}

impl OutputStack {
    pub fn new(root: Box<dyn OutputConsumer>) -> Self {
        OutputStack { sinks: vec![Sink::Root(root)], total_bytes: 0 }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.total_bytes += bytes.len() as u64;
        match self.sinks.last_mut().expect("output stack is never empty") {
            Sink::Root(consumer) => consumer.consume(bytes),
            Sink::Buffer(buf) => buf.extend_from_slice(bytes),
        }
    }

    pub fn push_buffer(&mut self) {
        self.sinks.push(Sink::Buffer(Vec::new()));
    }

    /// Pop the top buffer, flushing its captured bytes into the sink below.
    /// Returns `None` if there was no buffer to pop (the root sink is never
    /// popped).
    pub fn pop_buffer_flush(&mut self) -> Option<Vec<u8>> {
        if self.sinks.len() <= 1 {
            return None;
        }
        let Sink::Buffer(captured) = self.sinks.pop().unwrap() else {
            unreachable!("root sink is never above index 0");
        };
        match self.sinks.last_mut().unwrap() {
            Sink::Root(consumer) => consumer.consume(&captured),
            Sink::Buffer(buf) => buf.extend_from_slice(&captured),
        }
        Some(captured)
    }

    /// Pop the top buffer and discard its contents instead of flushing
    /// (`ob_end_clean()`-style).
    pub fn pop_buffer_discard(&mut self) -> Option<Vec<u8>> {
        if self.sinks.len() <= 1 {
            return None;
        }
        let Sink::Buffer(captured) = self.sinks.pop().unwrap() else {
            unreachable!("root sink is never above index 0");
        };
        Some(captured)
    }

    pub fn current_buffer(&self) -> Option<&[u8]> {
        match self.sinks.last()? {
            Sink::Buffer(b) => Some(b.as_slice()),
            Sink::Root(_) => None,
        }
    }

    /// Take the bytes captured in the top buffer so far without popping the
    /// stack level, leaving it empty to keep accumulating. Used by an
    /// embedder that calls `execute` more than once against the same
    /// capturing buffer (spec §6 "register... between runs").
    pub fn drain_current_buffer(&mut self) -> Option<Vec<u8>> {
        match self.sinks.last_mut()? {
            Sink::Buffer(b) => Some(std::mem::take(b)),
            Sink::Root(_) => None,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_pop_flushes_into_sink_below() {
        let mut stack = OutputStack::new(Box::new(BufferConsumer::default()));
        stack.write(b"a");
        stack.push_buffer();
        stack.write(b"b");
        let popped = stack.pop_buffer_flush().unwrap();
        assert_eq!(popped, b"b");
        assert_eq!(stack.total_bytes(), 2);
    }
}
