// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Command table with lookup, completion, and line tokenizer.
// Author: Lukas Bower

//! Command registry shared by every shell transport.
//!
//! The registry is an explicit process-wide value: construct it once with
//! [`CommandRegistry::new`] and hand the `Arc` to each transport. The
//! built-in `help` command is registered during construction.

use std::sync::{Arc, Mutex, Weak};

use crate::error::ShellError;
use crate::output::CommandOutput;

/// Maximum number of registered commands.
pub const MAX_COMMANDS: usize = 64;

/// Maximum number of arguments produced by the tokenizer.
pub const MAX_ARGS: usize = 32;

/// Capacity of the completion buffer returned by [`CommandRegistry::autocomplete`].
pub const MAX_COMPLETION_LEN: usize = 64;

/// Callback invoked when a registered command executes.
///
/// `argv[0]` is the command name. The returned status is informational and
/// is not surfaced to the peer. Registration context is captured by the
/// handler itself, so any `Fn` closure over owned state qualifies.
pub trait CommandHandler: Send + Sync {
    /// Execute the command with the tokenized arguments and output handle.
    fn run(&self, argv: &[&str], out: &mut CommandOutput<'_>) -> i32;
}

impl<F> CommandHandler for F
where
    F: Fn(&[&str], &mut CommandOutput<'_>) -> i32 + Send + Sync,
{
    fn run(&self, argv: &[&str], out: &mut CommandOutput<'_>) -> i32 {
        (self)(argv, out)
    }
}

/// Descriptor for a registered shell command.
#[derive(Clone)]
pub struct CmdEntry {
    /// Command name; unique across the registry.
    pub name: &'static str,
    /// Human-readable description shown by `help`.
    pub desc: &'static str,
    handler: Arc<dyn CommandHandler>,
}

impl CmdEntry {
    /// Invoke the command callback.
    pub fn invoke(&self, argv: &[&str], out: &mut CommandOutput<'_>) -> i32 {
        self.handler.run(argv, out)
    }
}

impl core::fmt::Debug for CmdEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CmdEntry")
            .field("name", &self.name)
            .field("desc", &self.desc)
            .finish_non_exhaustive()
    }
}

/// Fixed-capacity command table.
///
/// Registration is serialized by a mutex. Lookup and iteration take the
/// same lock; with at most [`MAX_COMMANDS`] entries the scans are cheap.
pub struct CommandRegistry {
    cmds: Mutex<Vec<CmdEntry>>,
}

impl CommandRegistry {
    /// Create a registry with the built-in `help` command installed.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|registry: &Weak<Self>| {
            let help_registry = registry.clone();
            let help = move |_argv: &[&str], out: &mut CommandOutput<'_>| -> i32 {
                if let Some(registry) = help_registry.upgrade() {
                    registry.for_each(|entry| {
                        let _ = out.print(format_args!("  {:<16} - {}\r\n", entry.name, entry.desc));
                    });
                }
                0
            };
            let mut cmds = Vec::with_capacity(MAX_COMMANDS);
            cmds.push(CmdEntry {
                name: "help",
                desc: "List all commands",
                handler: Arc::new(help),
            });
            Self {
                cmds: Mutex::new(cmds),
            }
        })
    }

    /// Register a command under a unique name.
    ///
    /// Fails with [`ShellError::DuplicateName`] when the name is taken and
    /// [`ShellError::RegistryFull`] at capacity.
    pub fn register(
        &self,
        name: &'static str,
        desc: &'static str,
        handler: impl CommandHandler + 'static,
    ) -> Result<(), ShellError> {
        let mut cmds = self.cmds.lock().expect("command registry lock poisoned");
        if cmds.iter().any(|entry| entry.name == name) {
            return Err(ShellError::DuplicateName);
        }
        if cmds.len() >= MAX_COMMANDS {
            return Err(ShellError::RegistryFull);
        }
        cmds.push(CmdEntry {
            name,
            desc,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// Find a command by exact name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<CmdEntry> {
        let cmds = self.cmds.lock().expect("command registry lock poisoned");
        cmds.iter().find(|entry| entry.name == name).cloned()
    }

    /// Visit every registered command in registration order.
    pub fn for_each(&self, mut visitor: impl FnMut(&CmdEntry)) {
        let cmds = self.cmds.lock().expect("command registry lock poisoned");
        for entry in cmds.iter() {
            visitor(entry);
        }
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cmds.lock().expect("command registry lock poisoned").len()
    }

    /// Whether the registry holds no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Complete a command-name prefix.
    ///
    /// Returns the match count together with the completion text: the full
    /// name for a single match, the longest common prefix across names for
    /// multiple matches, and an empty string for none. The text silently
    /// truncates at [`MAX_COMPLETION_LEN`].
    #[must_use]
    pub fn autocomplete(&self, prefix: &str) -> (usize, heapless::String<MAX_COMPLETION_LEN>) {
        let cmds = self.cmds.lock().expect("command registry lock poisoned");
        let matches: Vec<&CmdEntry> = cmds
            .iter()
            .filter(|entry| entry.name.starts_with(prefix))
            .collect();
        let mut out = heapless::String::new();
        match matches.len() {
            0 => {}
            1 => push_truncated(&mut out, matches[0].name),
            _ => {
                let first = matches[0].name;
                let mut common = first.len();
                for entry in &matches[1..] {
                    let shared = first
                        .bytes()
                        .zip(entry.name.bytes())
                        .take_while(|(a, b)| a == b)
                        .count();
                    common = common.min(shared);
                }
                push_truncated(&mut out, &first[..common]);
            }
        }
        (matches.len(), out)
    }
}

fn push_truncated<const N: usize>(out: &mut heapless::String<N>, text: &str) {
    for ch in text.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
}

/// Split a command line into arguments.
///
/// Space and tab separate tokens. A token beginning with `"` or `'` extends
/// to the matching close quote; inside a quoted region a backslash escapes
/// the following byte (the backslash is dropped and the byte taken
/// literally). An unterminated quote extends to end of line. The argument
/// count caps at [`MAX_ARGS`]; further input is dropped.
#[must_use]
pub fn split_line(line: &str) -> Vec<String> {
    let bytes = line.as_bytes();
    let mut argv = Vec::new();
    let mut i = 0;

    while i < bytes.len() && argv.len() < MAX_ARGS {
        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let mut token = String::new();
        if bytes[i] == b'"' || bytes[i] == b'\'' {
            let quote = bytes[i];
            i += 1;
            while i < bytes.len() && bytes[i] != quote {
                if bytes[i] == b'\\' && i + 1 < bytes.len() {
                    token.push(bytes[i + 1] as char);
                    i += 2;
                } else {
                    token.push(bytes[i] as char);
                    i += 1;
                }
            }
            if i < bytes.len() {
                i += 1; // closing quote
            }
        } else {
            while i < bytes.len() && bytes[i] != b' ' && bytes[i] != b'\t' {
                token.push(bytes[i] as char);
                i += 1;
            }
        }
        argv.push(token);
    }

    argv
}
