// Author: Lukas Bower
// Purpose: Shared fixtures for the embsh integration suites.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use embsh::{ByteChannel, CommandRegistry, Session};

/// Initialise test logging once per binary.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Handles into a [`MemChannel`] owned by a session under test.
pub struct ChannelHandles {
    pub input: Arc<Mutex<VecDeque<u8>>>,
    pub output: Arc<Mutex<Vec<u8>>>,
}

impl ChannelHandles {
    /// Queue bytes for the session to read.
    pub fn feed(&self, bytes: &[u8]) {
        self.input.lock().unwrap().extend(bytes.iter().copied());
    }

    /// Everything the session wrote so far.
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output.lock().unwrap()).into_owned()
    }

    /// Bytes the session has not consumed yet.
    pub fn unread(&self) -> usize {
        self.input.lock().unwrap().len()
    }

    /// Discard captured output.
    pub fn clear_output(&self) {
        self.output.lock().unwrap().clear();
    }
}

/// In-memory channel driving the editor without descriptors.
pub struct MemChannel {
    input: Arc<Mutex<VecDeque<u8>>>,
    output: Arc<Mutex<Vec<u8>>>,
}

impl MemChannel {
    pub fn new() -> (Self, ChannelHandles) {
        let input = Arc::new(Mutex::new(VecDeque::new()));
        let output = Arc::new(Mutex::new(Vec::new()));
        let channel = Self {
            input: Arc::clone(&input),
            output: Arc::clone(&output),
        };
        (channel, ChannelHandles { input, output })
    }
}

impl ByteChannel for MemChannel {
    fn poll_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(!self.input.lock().unwrap().is_empty())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.input.lock().unwrap().pop_front())
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.input.lock().unwrap().front().copied())
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.output.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }
}

/// Session over an in-memory channel with the given prompt.
pub fn scripted_session(
    registry: Arc<CommandRegistry>,
    prompt: &str,
    telnet_mode: bool,
) -> (Session, ChannelHandles) {
    let (channel, handles) = MemChannel::new();
    let session = Session::new(Box::new(channel), registry, prompt, telnet_mode);
    (session, handles)
}

/// Feed every byte through the editor, returning how many completed lines
/// were reported.
pub fn feed_bytes(session: &mut Session, bytes: &[u8]) -> usize {
    bytes
        .iter()
        .filter(|byte| session.process_byte(**byte))
        .count()
}

/// Drain whatever a descriptor produces within the window.
pub fn drain_fd(fd: &OwnedFd, window: Duration) -> String {
    let deadline = Instant::now() + window;
    let mut data = Vec::new();
    let mut buf = [0u8; 512];
    while Instant::now() < deadline {
        let mut fds = [nix::poll::PollFd::new(fd.as_fd(), nix::poll::PollFlags::POLLIN)];
        match nix::poll::poll(&mut fds, 50u16) {
            Ok(0) | Err(_) => continue,
            Ok(_) => {}
        }
        match nix::unistd::read(fd.as_raw_fd(), &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

/// Write a string to a descriptor, ignoring short-write edge cases that do
/// not occur at test sizes.
pub fn write_fd(fd: &OwnedFd, text: &str) {
    let _ = nix::unistd::write(fd, text.as_bytes());
}
