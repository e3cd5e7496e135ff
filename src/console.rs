// Author: Lukas Bower

//! Local console transport over stdin/stdout.

use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::info;
use nix::sys::termios::Termios;

use crate::error::ShellError;
use crate::registry::CommandRegistry;
use crate::session::{FdChannel, Session};
use crate::tty;

/// Console transport configuration.
#[derive(Debug)]
pub struct ConsoleConfig {
    /// Prompt string emitted before each line.
    pub prompt: String,
    /// Whether to switch the terminal into raw mode while running. Skipped
    /// automatically when the read descriptor is not a terminal.
    pub raw_mode: bool,
    /// Optional read/write descriptor override; tests pass pipe ends here.
    /// `None` duplicates stdin/stdout at start.
    pub io: Option<(OwnedFd, OwnedFd)>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            prompt: crate::DEFAULT_PROMPT.to_owned(),
            raw_mode: true,
            io: None,
        }
    }
}

/// Interactive console shell.
///
/// Runs either on a background thread ([`start`](Self::start) /
/// [`stop`](Self::stop)) or synchronously on the calling thread
/// ([`run`](Self::run)). Original terminal attributes are restored on stop
/// iff they were captured.
pub struct ConsoleShell {
    cfg: ConsoleConfig,
    registry: Arc<CommandRegistry>,
    running: Arc<AtomicBool>,
    active: Option<Arc<AtomicBool>>,
    handle: Option<JoinHandle<()>>,
    restore: Option<(OwnedFd, Termios)>,
}

impl ConsoleShell {
    /// Create a console shell over the given registry.
    #[must_use]
    pub fn new(cfg: ConsoleConfig, registry: Arc<CommandRegistry>) -> Self {
        Self {
            cfg,
            registry,
            running: Arc::new(AtomicBool::new(false)),
            active: None,
            handle: None,
            restore: None,
        }
    }

    /// Start the console shell on a background thread.
    pub fn start(&mut self) -> Result<(), ShellError> {
        if self.running.load(Ordering::Relaxed) {
            return Err(ShellError::AlreadyRunning);
        }

        let mut session = self.build_session()?;
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        self.handle = Some(thread::spawn(move || session.run_loop(&running)));

        info!("console shell started");
        Ok(())
    }

    /// Run the console shell on the calling thread until the session ends.
    pub fn run(&mut self) -> Result<(), ShellError> {
        if self.running.load(Ordering::Relaxed) {
            return Err(ShellError::AlreadyRunning);
        }

        let mut session = self.build_session()?;
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        session.run_loop(&running);
        self.running.store(false, Ordering::Release);
        self.restore_termios();
        Ok(())
    }

    /// Stop the console shell and restore the terminal. Idempotent.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(active) = self.active.take() {
            active.store(false, Ordering::Release);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.restore_termios();
        info!("console shell stopped");
    }

    /// Whether the shell loop is live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn build_session(&mut self) -> Result<Session, ShellError> {
        let (read_fd, write_fd) = match self.cfg.io.take() {
            Some(pair) => pair,
            None => {
                let read = io::stdin()
                    .as_fd()
                    .try_clone_to_owned()
                    .map_err(|_| ShellError::DeviceOpenFailed)?;
                let write = io::stdout()
                    .as_fd()
                    .try_clone_to_owned()
                    .map_err(|_| ShellError::DeviceOpenFailed)?;
                (read, write)
            }
        };

        if self.cfg.raw_mode {
            if let Some(saved) = tty::enter_raw_mode(&read_fd) {
                let dup = read_fd
                    .try_clone()
                    .map_err(|_| ShellError::DeviceOpenFailed)?;
                self.restore = Some((dup, saved));
            }
        }

        let session = Session::new(
            Box::new(FdChannel::new(read_fd, write_fd)),
            Arc::clone(&self.registry),
            self.cfg.prompt.clone(),
            false,
        );
        self.active = Some(session.active_handle());
        Ok(session)
    }

    fn restore_termios(&mut self) {
        if let Some((fd, saved)) = self.restore.take() {
            tty::restore_mode(&fd, &saved);
        }
    }
}

impl Drop for ConsoleShell {
    fn drop(&mut self) {
        self.stop();
    }
}
