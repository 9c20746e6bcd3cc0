//! In-memory transport for exercising the link without hardware

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use super::{PortOpener, Transport};
use crate::protocol::BaudRate;

#[derive(Default)]
struct LineState {
    written: Vec<u8>,
    inbound: VecDeque<u8>,
    stalls_remaining: usize,
    stall_forever: bool,
    max_write: Option<usize>,
    write_error: Option<io::ErrorKind>,
    read_error: Option<io::ErrorKind>,
    write_attempts: usize,
}

/// Shared view of one simulated wire; every transport opened on it sees the same state
#[derive(Clone, Default)]
pub struct MockLine {
    state: Arc<Mutex<LineState>>,
}

impl MockLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if the peer had sent them
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state.lock().unwrap().inbound.extend(bytes.iter().copied());
    }

    /// Everything the link has written so far
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    /// Reject the next `n` write calls with a timeout
    pub fn stall_next(&self, n: usize) {
        self.state.lock().unwrap().stalls_remaining = n;
    }

    pub fn stall_forever(&self, stall: bool) {
        self.state.lock().unwrap().stall_forever = stall;
    }

    /// Accept at most `n` bytes per write call
    pub fn limit_write(&self, n: usize) {
        self.state.lock().unwrap().max_write = Some(n);
    }

    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.state.lock().unwrap().write_error = Some(kind);
    }

    pub fn fail_reads(&self, kind: io::ErrorKind) {
        self.state.lock().unwrap().read_error = Some(kind);
    }

    pub fn write_attempts(&self) -> usize {
        self.state.lock().unwrap().write_attempts
    }
}

pub struct MockTransport {
    line: MockLine,
}

impl MockTransport {
    pub fn new(line: MockLine) -> Self {
        Self { line }
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.line.state.lock().unwrap();
        if let Some(kind) = state.read_error {
            return Err(io::Error::from(kind));
        }
        if state.inbound.is_empty() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.line.state.lock().unwrap();
        state.write_attempts += 1;
        if let Some(kind) = state.write_error {
            return Err(io::Error::from(kind));
        }
        if state.stall_forever {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        if state.stalls_remaining > 0 {
            state.stalls_remaining -= 1;
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let n = state.max_write.map_or(buf.len(), |max| max.min(buf.len()));
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn bytes_to_read(&self) -> io::Result<u32> {
        let state = self.line.state.lock().unwrap();
        if let Some(kind) = state.read_error {
            return Err(io::Error::from(kind));
        }
        Ok(state.inbound.len() as u32)
    }

    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(MockTransport::new(self.line.clone())))
    }
}

/// Opener backed by a fixed table of simulated devices
#[derive(Default)]
pub struct MockOpener {
    devices: HashMap<String, MockLine>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device and return the line behind it
    pub fn add_device(&mut self, name: &str) -> MockLine {
        let line = MockLine::new();
        self.devices.insert(name.to_string(), line.clone());
        line
    }
}

impl PortOpener for MockOpener {
    fn open(&self, device: &str, _baud: BaudRate) -> io::Result<Box<dyn Transport>> {
        let line = self.devices.get(device).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such device: {}", device))
        })?;
        Ok(Box::new(MockTransport::new(line.clone())))
    }

    fn available_devices(&self) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = self.devices.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
