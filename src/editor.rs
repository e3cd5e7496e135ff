// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Byte-driven line editor: filters, keystrokes, and dispatch.
// Author: Lukas Bower

//! The line-editing automaton.
//!
//! [`Session::process_byte`] consumes one input byte at a time, filtering
//! telnet IAC negotiation and ANSI `ESC [` sequences before applying
//! keystroke semantics. When it reports a completed line the caller runs
//! [`Session::execute_line`], resets the buffer, and re-emits the prompt.

use std::sync::Arc;
use std::time::Duration;

use crate::history::HistoryDown;
use crate::output::CommandOutput;
use crate::session::{EscState, IacState, Session, MAX_LINE_LEN};

/// Telnet Interpret-As-Command escape byte.
pub(crate) const IAC: u8 = 0xFF;
/// Telnet subnegotiation-begin verb.
pub(crate) const SB: u8 = 0xFA;
/// Telnet WILL verb; WONT/DO/DONT follow contiguously.
pub(crate) const WILL: u8 = 0xFB;
/// Telnet DONT verb, the last negotiation verb.
pub(crate) const DONT: u8 = 0xFE;

impl Session {
    /// Run the telnet IAC filter over one byte.
    ///
    /// Returns the byte to hand to the editor, or `None` when the filter
    /// consumed it. An `IAC IAC` pair yields a literal `0xFF`.
    /// Subnegotiation parsing is lenient: inside SUB, `IAC` re-enters the
    /// IAC state and any following byte returns to NORMAL, not only SE.
    pub fn filter_iac(&mut self, byte: u8) -> Option<u8> {
        match self.iac_state {
            IacState::Normal => {
                if byte == IAC {
                    self.iac_state = IacState::Iac;
                    None
                } else {
                    Some(byte)
                }
            }
            IacState::Iac => match byte {
                WILL..=DONT => {
                    self.iac_state = IacState::Nego;
                    None
                }
                SB => {
                    self.iac_state = IacState::Sub;
                    None
                }
                IAC => {
                    self.iac_state = IacState::Normal;
                    Some(IAC)
                }
                _ => {
                    self.iac_state = IacState::Normal;
                    None
                }
            },
            IacState::Nego => {
                // Option byte after WILL/WONT/DO/DONT.
                self.iac_state = IacState::Normal;
                None
            }
            IacState::Sub => {
                if byte == IAC {
                    self.iac_state = IacState::Iac;
                }
                None
            }
        }
    }

    /// Consume one input byte; `true` means a complete line is ready.
    pub fn process_byte(&mut self, byte: u8) -> bool {
        let byte = if self.telnet_mode {
            match self.filter_iac(byte) {
                Some(byte) => byte,
                None => return false,
            }
        } else {
            byte
        };

        match self.esc_state {
            EscState::Esc => {
                self.esc_state = if byte == b'[' {
                    EscState::Bracket
                } else {
                    EscState::None
                };
                return false;
            }
            EscState::Bracket => {
                self.esc_state = EscState::None;
                match byte {
                    b'A' => self.history_up(),
                    b'B' => self.history_down(),
                    // 'C'/'D' reserved for cursor movement.
                    _ => {}
                }
                return false;
            }
            EscState::None => {}
        }

        match byte {
            0x1B => {
                self.esc_state = EscState::Esc;
                false
            }
            0x03 => {
                // Ctrl+C cancels the current line.
                self.write_str("^C\r\n");
                self.line.clear();
                self.history.reset_cursor();
                self.write_prompt();
                false
            }
            0x04 => {
                // Ctrl+D on an empty line ends the session.
                if self.line.is_empty() {
                    self.write_str("\r\nBye.\r\n");
                    self.deactivate();
                }
                false
            }
            0x08 | 0x7F => {
                if !self.line.is_empty() {
                    self.line.pop();
                    self.write_str("\x08 \x08");
                }
                false
            }
            b'\t' => {
                self.tab_complete();
                false
            }
            b'\r' | b'\n' => {
                self.write_str("\r\n");
                if self.telnet_mode && byte == b'\r' {
                    self.consume_crlf_pairing();
                }
                self.history.reset_cursor();
                if self.line.is_empty() {
                    self.write_prompt();
                    return false;
                }
                let line = self.line.clone();
                self.history.push(line.as_str());
                true
            }
            0x20..=0x7E => {
                if self.line.len() < MAX_LINE_LEN - 1 {
                    let _ = self.line.push(byte as char);
                    self.write_bytes(&[byte]);
                }
                false
            }
            _ => false,
        }
    }

    /// Tokenize and dispatch the committed line.
    ///
    /// `exit` and `quit` are handled here as built-ins; every other verb
    /// goes through the registry. A miss writes one diagnostic line to the
    /// peer.
    pub fn execute_line(&mut self) {
        let tokens = crate::registry::split_line(self.line.as_str());
        if tokens.is_empty() {
            return;
        }
        let argv: Vec<&str> = tokens.iter().map(String::as_str).collect();

        if argv[0] == "exit" || argv[0] == "quit" {
            self.write_str("Bye.\r\n");
            self.deactivate();
            return;
        }

        match self.registry().find(argv[0]) {
            Some(entry) => {
                let mut out = CommandOutput::new(self.channel.as_mut());
                let _ = entry.invoke(&argv, &mut out);
            }
            None => {
                let message = format!("unknown command: {}\r\n", argv[0]);
                self.write_str(&message);
            }
        }
    }

    fn history_up(&mut self) {
        if let Some(entry) = self.history.up() {
            self.replace_line(entry.as_str());
        }
    }

    fn history_down(&mut self) {
        match self.history.down() {
            HistoryDown::Idle => {}
            HistoryDown::Live => {
                self.erase_rendered_line();
                self.line.clear();
            }
            HistoryDown::Entry(entry) => self.replace_line(entry.as_str()),
        }
    }

    /// Erase the rendered line with destructive backspaces.
    fn erase_rendered_line(&mut self) {
        for _ in 0..self.line.len() {
            self.write_str("\x08 \x08");
        }
    }

    /// Swap the line buffer for `text` and redraw it.
    fn replace_line(&mut self, text: &str) {
        self.erase_rendered_line();
        self.line.clear();
        for ch in text.chars() {
            if self.line.len() >= MAX_LINE_LEN - 1 {
                break;
            }
            let _ = self.line.push(ch);
        }
        let _ = self.channel.write_all(self.line.as_bytes());
    }

    fn tab_complete(&mut self) {
        let (matches, completion) = self.registry().autocomplete(self.line.as_str());
        if matches == 1 {
            self.erase_rendered_line();
            self.line.clear();
            for ch in completion.chars() {
                if self.line.len() >= MAX_LINE_LEN - 2 {
                    break;
                }
                let _ = self.line.push(ch);
            }
            let _ = self.line.push(' ');
            let _ = self.channel.write_all(self.line.as_bytes());
        } else if matches > 1 {
            self.write_str("\r\n");
            let prefix = self.line.clone();
            let registry = Arc::clone(self.registry());
            registry.for_each(|entry| {
                if entry.name.starts_with(prefix.as_str()) {
                    let _ = self.channel.write_all(entry.name.as_bytes());
                    let _ = self.channel.write_all(b"  ");
                }
            });
            self.write_str("\r\n");
            self.write_prompt();
            self.line.clear();
            for ch in completion.chars() {
                if self.line.len() >= MAX_LINE_LEN - 1 {
                    break;
                }
                let _ = self.line.push(ch);
            }
            let _ = self.channel.write_all(self.line.as_bytes());
        }
    }

    /// After a CR in telnet mode, absorb an already-queued LF or NUL so
    /// CR-LF and CR-NUL client framings commit a single line. The peek is
    /// gated on a zero-timeout poll, so a bare CR never stalls the session.
    pub(crate) fn consume_crlf_pairing(&mut self) {
        if let Ok(true) = self.channel.poll_readable(Duration::ZERO) {
            if let Ok(Some(next)) = self.channel.peek_byte() {
                if next == b'\n' || next == 0 {
                    let _ = self.channel.read_byte();
                }
            }
        }
    }
}
