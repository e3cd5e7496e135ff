// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Per-connection session state and byte-stream channel seams.
// Author: Lukas Bower

//! Session state record and the byte-oriented I/O seam shared by all
//! transports.
//!
//! A [`Session`] is created fully initialized by its transport, driven by
//! exactly one thread, and torn down when the peer disconnects or the
//! transport stops. The only field shared across threads is the `active`
//! latch used for cooperative shutdown.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags};

use crate::history::History;
use crate::registry::CommandRegistry;

/// Line buffer capacity; one slot is reserved so the rendered line never
/// exceeds `MAX_LINE_LEN - 1` printables.
pub const MAX_LINE_LEN: usize = 256;

/// Poll interval for session input, bounding shutdown latency.
pub(crate) const INPUT_POLL: Duration = Duration::from_millis(200);

/// Byte-oriented duplex channel driving a session.
///
/// Implementations exist for TCP streams and descriptor pairs, which lets
/// sockets, pipes, serial ports, and PTYs share the line editor. Writes
/// from the editor are best-effort; callers discard errors.
pub trait ByteChannel: Send {
    /// Wait until input is readable or the timeout elapses.
    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Read one byte. `Ok(None)` signals end of stream.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Look at the next byte without consuming it, when the transport
    /// supports it. The default reports nothing available.
    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(None)
    }

    /// Write the whole buffer.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

pub(crate) fn poll_fd(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let millis = timeout.as_millis().min(u128::from(u16::MAX)) as u16;
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    match poll(&mut fds, millis) {
        Ok(0) => Ok(false),
        Ok(_) => Ok(true),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Channel over a connected TCP stream.
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Wrap a connected stream.
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl ByteChannel for TcpChannel {
    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        poll_fd(self.stream.as_fd(), timeout)
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.stream.peek(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }
}

/// Channel over a read/write descriptor pair.
///
/// Covers the console (stdin/stdout), serial devices, and the pipe or PTY
/// fixtures used in tests. Both halves may be duplicates of one
/// descriptor.
#[derive(Debug)]
pub struct FdChannel {
    read_fd: OwnedFd,
    write_fd: OwnedFd,
}

impl FdChannel {
    /// Build a channel from owned read and write descriptors.
    #[must_use]
    pub fn new(read_fd: OwnedFd, write_fd: OwnedFd) -> Self {
        Self { read_fd, write_fd }
    }
}

impl ByteChannel for FdChannel {
    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        poll_fd(self.read_fd.as_fd(), timeout)
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match nix::unistd::read(self.read_fd.as_raw_fd(), &mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            match nix::unistd::write(&self.write_fd, &bytes[written..]) {
                Ok(n) => written += n,
                Err(nix::errno::Errno::EINTR) => {}
                Err(errno) => return Err(io::Error::from(errno)),
            }
        }
        Ok(())
    }
}

/// Per-connection state: line buffer, history, sub-protocol automata, and
/// the shared shutdown latch.
pub struct Session {
    pub(crate) channel: Box<dyn ByteChannel>,
    registry: Arc<CommandRegistry>,
    prompt: String,
    pub(crate) telnet_mode: bool,
    pub(crate) line: heapless::String<MAX_LINE_LEN>,
    pub(crate) history: History,
    pub(crate) esc_state: EscState,
    pub(crate) iac_state: IacState,
    active: Arc<AtomicBool>,
    pub(crate) auth_required: bool,
    pub(crate) authenticated: bool,
    pub(crate) auth_attempts: u8,
}

/// ANSI escape-sequence automaton state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum EscState {
    /// Not inside an escape sequence.
    #[default]
    None,
    /// Saw ESC, awaiting `[`.
    Esc,
    /// Saw `ESC [`, awaiting the final byte.
    Bracket,
}

/// Telnet IAC automaton state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum IacState {
    /// Passing bytes through.
    #[default]
    Normal,
    /// Saw IAC, awaiting a verb.
    Iac,
    /// Saw a negotiation verb, awaiting the option byte.
    Nego,
    /// Inside a subnegotiation block.
    Sub,
}

impl Session {
    /// Create a fully initialized session over the given channel.
    #[must_use]
    pub fn new(
        channel: Box<dyn ByteChannel>,
        registry: Arc<CommandRegistry>,
        prompt: impl Into<String>,
        telnet_mode: bool,
    ) -> Self {
        Self {
            channel,
            registry,
            prompt: prompt.into(),
            telnet_mode,
            line: heapless::String::new(),
            history: History::new(),
            esc_state: EscState::None,
            iac_state: IacState::Normal,
            active: Arc::new(AtomicBool::new(true)),
            auth_required: false,
            authenticated: true,
            auth_attempts: 0,
        }
    }

    /// Shared handle to the `active` latch, for cooperative shutdown.
    #[must_use]
    pub fn active_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }

    /// Whether the session is still live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Clear the `active` latch.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Current line buffer contents.
    #[must_use]
    pub fn line(&self) -> &str {
        self.line.as_str()
    }

    /// Clear the line buffer.
    pub fn clear_line(&mut self) {
        self.line.clear();
    }

    /// The session's history ring.
    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Mutable access to the history ring.
    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// The registry this session dispatches into.
    #[must_use]
    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Best-effort write of a string to the peer.
    pub fn write_str(&mut self, text: &str) {
        let _ = self.channel.write_all(text.as_bytes());
    }

    /// Best-effort write of raw bytes to the peer.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let _ = self.channel.write_all(bytes);
    }

    /// Re-emit the prompt.
    pub fn write_prompt(&mut self) {
        let _ = self.channel.write_all(self.prompt.as_bytes());
    }

    /// Drive the session until the peer disconnects, the session
    /// deactivates, or `running` clears.
    ///
    /// This is the shared transport loop: poll for input, feed one byte to
    /// the editor, execute completed lines, re-emit the prompt.
    pub fn run_loop(&mut self, running: &AtomicBool) {
        self.write_prompt();

        while running.load(Ordering::Relaxed) && self.is_active() {
            match self.channel.poll_readable(INPUT_POLL) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }

            let byte = match self.channel.read_byte() {
                Ok(Some(byte)) => byte,
                Ok(None) => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };

            if self.process_byte(byte) {
                self.execute_line();
                self.clear_line();
                if self.is_active() {
                    self.write_prompt();
                }
            }
        }
    }
}
