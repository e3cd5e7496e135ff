// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Error taxonomy shared by the shell registry and transports.
// Author: Lukas Bower

//! Flat error vocabulary for fallible shell boundary operations.

use thiserror::Error;

/// Errors surfaced by registration and transport start paths.
///
/// The editor and command execution paths never raise errors: malformed
/// bytes are ignored, overflows truncate, and a missing command produces a
/// line of output instead of a fault.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ShellError {
    /// The command table is at capacity.
    #[error("command registry is full")]
    RegistryFull,
    /// A command with the same name is already registered.
    #[error("command name is already registered")]
    DuplicateName,
    /// The peer failed the login gate.
    #[error("authentication failed")]
    AuthFailed,
    /// The listen port could not be bound.
    #[error("listen port is unavailable")]
    PortInUse,
    /// The transport is already running.
    #[error("transport is already running")]
    AlreadyRunning,
    /// The transport is not running.
    #[error("transport is not running")]
    NotRunning,
    /// The device could not be opened or configured.
    #[error("device open or configuration failed")]
    DeviceOpenFailed,
    /// A supplied argument was rejected.
    #[error("invalid argument")]
    InvalidArgument,
}
