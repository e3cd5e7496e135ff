// Author: Lukas Bower

//! termios plumbing for the console and serial transports.

use std::os::fd::AsFd;

use nix::sys::termios::{
    cfsetispeed, cfsetospeed, tcgetattr, tcsetattr, BaudRate, ControlFlags, InputFlags,
    LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices, Termios,
};

use crate::error::ShellError;

/// Switch a terminal descriptor into raw mode, returning the previous
/// attributes for later restore.
///
/// Returns `None` when the descriptor is not a terminal (pipes in tests),
/// in which case nothing was changed.
pub(crate) fn enter_raw_mode(fd: &impl AsFd) -> Option<Termios> {
    let saved = tcgetattr(fd).ok()?;

    let mut raw = saved.clone();
    raw.local_flags.remove(
        LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::ISIG | LocalFlags::IEXTEN,
    );
    raw.input_flags.remove(
        InputFlags::IXON
            | InputFlags::IXOFF
            | InputFlags::ICRNL
            | InputFlags::INLCR
            | InputFlags::IGNCR,
    );
    raw.output_flags.remove(OutputFlags::OPOST);
    raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    tcsetattr(fd, SetArg::TCSANOW, &raw).ok()?;
    Some(saved)
}

/// Restore previously captured terminal attributes.
pub(crate) fn restore_mode(fd: &impl AsFd, saved: &Termios) {
    let _ = tcsetattr(fd, SetArg::TCSANOW, saved);
}

/// Configure a serial descriptor: 8N1, no flow control, raw discipline,
/// `VMIN=1 VTIME=0`, and the requested baud rate.
pub(crate) fn configure_serial(fd: &impl AsFd, baudrate: u32) -> Result<(), ShellError> {
    let mut tty = tcgetattr(fd).map_err(|_| ShellError::DeviceOpenFailed)?;

    let speed = baud_to_speed(baudrate);
    cfsetispeed(&mut tty, speed).map_err(|_| ShellError::DeviceOpenFailed)?;
    cfsetospeed(&mut tty, speed).map_err(|_| ShellError::DeviceOpenFailed)?;

    tty.control_flags.remove(ControlFlags::CSIZE);
    tty.control_flags
        .insert(ControlFlags::CS8 | ControlFlags::CLOCAL | ControlFlags::CREAD);
    tty.control_flags
        .remove(ControlFlags::PARENB | ControlFlags::CSTOPB | ControlFlags::CRTSCTS);

    tty.local_flags.remove(
        LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ISIG,
    );
    tty.input_flags.remove(
        InputFlags::IXON
            | InputFlags::IXOFF
            | InputFlags::IXANY
            | InputFlags::ICRNL
            | InputFlags::INLCR
            | InputFlags::IGNCR,
    );
    tty.output_flags.remove(OutputFlags::OPOST);

    tty.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    tty.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    tcsetattr(fd, SetArg::TCSANOW, &tty).map_err(|_| ShellError::DeviceOpenFailed)
}

/// Fixed lookup of supported baud rates; unknown values fall back to
/// 115200.
fn baud_to_speed(baudrate: u32) -> BaudRate {
    match baudrate {
        9_600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        460_800 => BaudRate::B460800,
        921_600 => BaudRate::B921600,
        _ => BaudRate::B115200,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baud_lookup_covers_supported_rates() {
        assert_eq!(baud_to_speed(9_600), BaudRate::B9600);
        assert_eq!(baud_to_speed(921_600), BaudRate::B921600);
    }

    #[test]
    fn unknown_baud_falls_back() {
        assert_eq!(baud_to_speed(12_345), BaudRate::B115200);
    }
}
