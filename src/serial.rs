// Author: Lukas Bower

//! Serial (UART) transport.

use std::fs::OpenOptions;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::info;

use crate::error::ShellError;
use crate::registry::CommandRegistry;
use crate::session::{FdChannel, Session};
use crate::tty;

/// Default serial device path.
pub const DEFAULT_DEVICE: &str = "/dev/ttyS0";

/// Default baud rate.
pub const DEFAULT_BAUDRATE: u32 = 115_200;

/// Serial transport configuration.
#[derive(Debug)]
pub struct SerialConfig {
    /// Device path opened when no override descriptor is supplied.
    pub device: PathBuf,
    /// Requested baud rate; values outside the supported table fall back
    /// to 115200.
    pub baudrate: u32,
    /// Prompt string emitted before each line.
    pub prompt: String,
    /// Pre-opened descriptor that bypasses `open` and termios setup; tests
    /// inject a PTY here. The shell takes ownership, so pass a duplicate
    /// to keep using the descriptor elsewhere.
    pub override_fd: Option<OwnedFd>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            baudrate: DEFAULT_BAUDRATE,
            prompt: crate::DEFAULT_PROMPT.to_owned(),
            override_fd: None,
        }
    }
}

/// UART shell backend.
///
/// Opens the configured device (8N1, raw, no flow control) and drives one
/// session over it on a background thread.
pub struct SerialShell {
    cfg: SerialConfig,
    registry: Arc<CommandRegistry>,
    running: Arc<AtomicBool>,
    active: Option<Arc<AtomicBool>>,
    handle: Option<JoinHandle<()>>,
}

impl SerialShell {
    /// Create a serial shell over the given registry.
    #[must_use]
    pub fn new(cfg: SerialConfig, registry: Arc<CommandRegistry>) -> Self {
        Self {
            cfg,
            registry,
            running: Arc::new(AtomicBool::new(false)),
            active: None,
            handle: None,
        }
    }

    /// Open and configure the device, then start the shell thread.
    pub fn start(&mut self) -> Result<(), ShellError> {
        if self.running.load(Ordering::Relaxed) {
            return Err(ShellError::AlreadyRunning);
        }

        let read_fd = match self.cfg.override_fd.take() {
            Some(fd) => fd,
            None => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .custom_flags(nix::libc::O_NOCTTY)
                    .open(&self.cfg.device)
                    .map_err(|_| ShellError::DeviceOpenFailed)?;
                let fd = OwnedFd::from(file);
                tty::configure_serial(&fd, self.cfg.baudrate)?;
                fd
            }
        };
        let write_fd = read_fd
            .try_clone()
            .map_err(|_| ShellError::DeviceOpenFailed)?;

        let mut session = Session::new(
            Box::new(FdChannel::new(read_fd, write_fd)),
            Arc::clone(&self.registry),
            self.cfg.prompt.clone(),
            false,
        );
        self.active = Some(session.active_handle());

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        self.handle = Some(thread::spawn(move || session.run_loop(&running)));

        info!("serial shell started on {}", self.cfg.device.display());
        Ok(())
    }

    /// Stop the shell; the device closes when the session drops.
    /// Idempotent.
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
        info!("serial shell stopped");
    }

    /// Whether the shell loop is live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Drop for SerialShell {
    fn drop(&mut self) {
        self.stop();
    }
}
