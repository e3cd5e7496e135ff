// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Embedded debug shell: registry, line editor, transports.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Embedded debug shell library.
//!
//! Applications register named commands once and expose them over any
//! combination of three transports sharing one registry and one
//! line-editing core: a multi-session TCP telnet server, the local
//! console, and a serial (UART) link.
//!
//! ```no_run
//! use embsh::{CommandOutput, CommandRegistry, ServerConfig, TelnetServer};
//!
//! let registry = CommandRegistry::new();
//! registry
//!     .register("uptime", "Show seconds since boot", |_argv: &[&str], out: &mut CommandOutput<'_>| {
//!         embsh::shell_print!(out, "uptime: {} s\r\n", 42);
//!         0
//!     })
//!     .expect("register uptime");
//!
//! let mut server = TelnetServer::new(ServerConfig::default(), registry);
//! server.start().expect("start telnet shell");
//! ```

pub mod console;
mod editor;
pub mod error;
pub mod history;
pub mod output;
pub mod registry;
pub mod serial;
pub mod session;
pub mod telnet;
mod tty;

/// Prompt emitted by every transport unless overridden.
pub const DEFAULT_PROMPT: &str = "embsh> ";

pub use console::{ConsoleConfig, ConsoleShell};
pub use error::ShellError;
pub use history::{History, HistoryDown, HISTORY_DEPTH};
pub use output::{CommandOutput, MAX_OUTPUT_LEN};
pub use registry::{
    split_line, CmdEntry, CommandHandler, CommandRegistry, MAX_ARGS, MAX_COMMANDS,
    MAX_COMPLETION_LEN,
};
pub use serial::{SerialConfig, SerialShell, DEFAULT_BAUDRATE, DEFAULT_DEVICE};
pub use session::{ByteChannel, FdChannel, Session, TcpChannel, MAX_LINE_LEN};
pub use telnet::{ServerConfig, TelnetServer, DEFAULT_PORT, MAX_SESSIONS};
