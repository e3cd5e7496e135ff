// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Multi-session TCP telnet transport with login gate.
// Author: Lukas Bower

//! TCP telnet debug server.
//!
//! Accepts up to a configured number of concurrent sessions, each driven
//! by its own thread over the shared line editor and command registry.
//! Shutdown is cooperative: `stop` clears the running latch, half-closes
//! every session socket to unblock in-flight reads, and joins the threads.

use std::io::Write;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::editor::{IAC, WILL};
use crate::error::ShellError;
use crate::registry::CommandRegistry;
use crate::session::{poll_fd, Session, TcpChannel, INPUT_POLL};

/// Default TCP listen port.
pub const DEFAULT_PORT: u16 = 2323;

/// Compile-time ceiling on concurrent telnet sessions.
pub const MAX_SESSIONS: usize = 8;

/// Poll interval of the accept loop, bounding stop latency.
const ACCEPT_POLL: Duration = Duration::from_millis(500);

/// Login attempts granted before the connection is dropped.
const MAX_AUTH_ATTEMPTS: u8 = 3;

/// Credential buffer capacity; longer input truncates silently.
const MAX_AUTH_LEN: usize = 64;

/// Telnet SUPPRESS-GO-AHEAD option.
const OPT_SGA: u8 = 0x03;
/// Telnet ECHO option.
const OPT_ECHO: u8 = 0x01;

/// Telnet server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listen port.
    pub port: u16,
    /// Cap on concurrent sessions, clamped to [`MAX_SESSIONS`].
    pub max_sessions: usize,
    /// Prompt string emitted before each line.
    pub prompt: String,
    /// Greeting sent at connect; empty disables the banner.
    pub banner: String,
    /// Login username; authentication is required iff both username and
    /// password are set.
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_sessions: MAX_SESSIONS,
            prompt: crate::DEFAULT_PROMPT.to_owned(),
            banner: "\r\n=== embsh v0.1.0 ===\r\n\r\n".to_owned(),
            username: None,
            password: None,
        }
    }
}

struct SessionSlot {
    in_use: AtomicBool,
    active: Mutex<Option<Arc<AtomicBool>>>,
    stream: Mutex<Option<TcpStream>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            in_use: AtomicBool::new(false),
            active: Mutex::new(None),
            stream: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }
}

struct ServerShared {
    cfg: ServerConfig,
    registry: Arc<CommandRegistry>,
    running: AtomicBool,
    slots: Vec<SessionSlot>,
}

/// Lightweight telnet debug server.
///
/// Dropping the server stops it, joining the accept thread and every
/// session thread.
pub struct TelnetServer {
    shared: Arc<ServerShared>,
    accept_handle: Option<JoinHandle<()>>,
}

impl TelnetServer {
    /// Create a server over the given registry. Nothing listens until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(cfg: ServerConfig, registry: Arc<CommandRegistry>) -> Self {
        let slot_count = cfg.max_sessions.min(MAX_SESSIONS);
        let slots = (0..slot_count).map(|_| SessionSlot::new()).collect();
        Self {
            shared: Arc::new(ServerShared {
                cfg,
                registry,
                running: AtomicBool::new(false),
                slots,
            }),
            accept_handle: None,
        }
    }

    /// Bind the listen port and spawn the accept thread.
    pub fn start(&mut self) -> Result<(), ShellError> {
        if self.shared.running.load(Ordering::Relaxed) {
            return Err(ShellError::AlreadyRunning);
        }

        let listener = TcpListener::bind(("0.0.0.0", self.shared.cfg.port)).map_err(|err| {
            warn!("telnet bind failed on port {}: {err}", self.shared.cfg.port);
            ShellError::PortInUse
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|_| ShellError::PortInUse)?;

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        self.accept_handle = Some(thread::spawn(move || accept_loop(&shared, &listener)));

        info!("telnet shell listening on port {}", self.shared.cfg.port);
        Ok(())
    }

    /// Stop the server and close every session. Idempotent.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }

        for slot in &self.shared.slots {
            if let Some(active) = slot.active.lock().expect("slot lock poisoned").take() {
                active.store(false, Ordering::Release);
            }
            if let Some(stream) = slot.stream.lock().expect("slot lock poisoned").take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
            if let Some(handle) = slot.handle.lock().expect("slot lock poisoned").take() {
                let _ = handle.join();
            }
            slot.in_use.store(false, Ordering::Release);
        }

        info!("telnet shell stopped");
    }

    /// Whether the accept loop is live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }
}

impl Drop for TelnetServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(shared: &Arc<ServerShared>, listener: &TcpListener) {
    while shared.running.load(Ordering::Relaxed) {
        match poll_fd(listener.as_fd(), ACCEPT_POLL) {
            Ok(true) => {}
            _ => continue,
        }

        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(_) => continue,
        };

        let Some(index) = find_free_slot(shared) else {
            let mut stream = stream;
            let _ = stream.write_all(b"Too many connections.\r\n");
            warn!("rejecting connection from {peer}: session slots exhausted");
            continue;
        };

        debug!("session {index} connected from {peer}");
        let slot = &shared.slots[index];
        slot.in_use.store(true, Ordering::Release);

        let shutdown_clone = stream.try_clone().ok();
        let mut session = Session::new(
            Box::new(TcpChannel::new(stream)),
            Arc::clone(&shared.registry),
            shared.cfg.prompt.clone(),
            true,
        );
        session.auth_required = shared.cfg.username.is_some() && shared.cfg.password.is_some();
        session.authenticated = !session.auth_required;

        *slot.active.lock().expect("slot lock poisoned") = Some(session.active_handle());
        *slot.stream.lock().expect("slot lock poisoned") = shutdown_clone;

        let task_shared = Arc::clone(shared);
        let handle = thread::spawn(move || session_task(&task_shared, index, session));
        *slot.handle.lock().expect("slot lock poisoned") = Some(handle);
    }
}

fn find_free_slot(shared: &ServerShared) -> Option<usize> {
    for (index, slot) in shared.slots.iter().enumerate() {
        if !slot.in_use.load(Ordering::Acquire) {
            // Reap a thread left behind by a session that ended on its own.
            if let Some(handle) = slot.handle.lock().expect("slot lock poisoned").take() {
                let _ = handle.join();
            }
            return Some(index);
        }
    }
    None
}

fn session_task(shared: &Arc<ServerShared>, index: usize, mut session: Session) {
    session.write_bytes(&[IAC, WILL, OPT_SGA]);
    session.write_bytes(&[IAC, WILL, OPT_ECHO]);

    if !shared.cfg.banner.is_empty() {
        session.write_str(&shared.cfg.banner);
    }

    if session.auth_required {
        run_auth(&mut session, shared);
        if !session.authenticated {
            session.write_str("Authentication failed.\r\n");
            session.deactivate();
            shared.slots[index].in_use.store(false, Ordering::Release);
            debug!("session {index} failed authentication");
            return;
        }
    }

    session.run_loop(&shared.running);

    session.deactivate();
    shared.slots[index].in_use.store(false, Ordering::Release);
    debug!("session {index} closed");
}

enum AuthPhase {
    User,
    Pass,
}

/// Drive the Username/Password exchange.
///
/// Echoes username bytes, masks password bytes with `*`, supports
/// destructive backspace, and filters telnet IAC traffic. Sets
/// `session.authenticated` on a byte-exact credential match within
/// [`MAX_AUTH_ATTEMPTS`] tries.
fn run_auth(session: &mut Session, shared: &ServerShared) {
    let username = shared.cfg.username.as_deref().unwrap_or_default();
    let password = shared.cfg.password.as_deref().unwrap_or_default();

    let mut phase = AuthPhase::User;
    let mut user: heapless::String<MAX_AUTH_LEN> = heapless::String::new();
    let mut pass: heapless::String<MAX_AUTH_LEN> = heapless::String::new();

    session.write_str("Username: ");

    while session.is_active() && session.auth_attempts < MAX_AUTH_ATTEMPTS {
        match session.channel.poll_readable(INPUT_POLL) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
        let byte = match session.channel.read_byte() {
            Ok(Some(byte)) => byte,
            Ok(None) => break,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        let byte = match session.filter_iac(byte) {
            Some(byte) => byte,
            None => continue,
        };

        match byte {
            0x08 | 0x7F => {
                let buf = match phase {
                    AuthPhase::User => &mut user,
                    AuthPhase::Pass => &mut pass,
                };
                if buf.pop().is_some() {
                    session.write_str("\x08 \x08");
                }
            }
            b'\r' | b'\n' => {
                if byte == b'\r' {
                    session.consume_crlf_pairing();
                }
                session.write_str("\r\n");

                match phase {
                    AuthPhase::User => {
                        phase = AuthPhase::Pass;
                        pass.clear();
                        session.write_str("Password: ");
                    }
                    AuthPhase::Pass => {
                        if user.as_str() == username && pass.as_str() == password {
                            session.authenticated = true;
                            session.write_str("Login successful.\r\n");
                            return;
                        }
                        session.auth_attempts += 1;
                        if session.auth_attempts < MAX_AUTH_ATTEMPTS {
                            session.write_str("Invalid credentials. Try again.\r\n");
                            phase = AuthPhase::User;
                            user.clear();
                            pass.clear();
                            session.write_str("Username: ");
                        }
                    }
                }
            }
            0x20..=0x7E => match phase {
                AuthPhase::User => {
                    if user.len() < MAX_AUTH_LEN - 1 {
                        let _ = user.push(byte as char);
                        session.write_bytes(&[byte]);
                    }
                }
                AuthPhase::Pass => {
                    if pass.len() < MAX_AUTH_LEN - 1 {
                        let _ = pass.push(byte as char);
                        session.write_str("*");
                    }
                }
            },
            _ => {}
        }
    }
}
