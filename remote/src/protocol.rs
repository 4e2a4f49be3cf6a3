//! Records of the streaming copy protocol spoken by `scp -t` receivers.
//!
//! A tree is sent as a pre-order sequence of records:
//!
//! ```text
//! D<mode> 0 <name>\n      enter directory
//! C<mode> <size> <name>\n followed by exactly <size> bytes and a single \0
//! E\n                     leave directory
//! ```
//!
//! `<mode>` is the permission part of the mode in octal, at least four digits.

use crate::Error;

/// Terminates the body of every file record.
pub const FILE_TRAILER: &[u8] = b"\0";

/// Closes the most recently opened directory record.
pub const DIRECTORY_TRAILER: &[u8] = b"E\n";

const PERMISSION_BITS: u32 = 0o7777;

fn check_name(name: &str) -> Result<(), Error> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\n', '\0'])
    {
        return Err(Error::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[must_use]
pub fn format_mode(mode: u32) -> String {
    format!("{:04o}", mode & PERMISSION_BITS)
}

pub fn directory_header(mode: u32, name: &str) -> Result<String, Error> {
    check_name(name)?;
    Ok(format!("D{} 0 {}\n", format_mode(mode), name))
}

pub fn file_header(mode: u32, size: u64, name: &str) -> Result<String, Error> {
    check_name(name)?;
    Ok(format!("C{} {} {}\n", format_mode(mode), size, name))
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')
}

/// Quotes `value` for a POSIX shell, leaving plain words untouched.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty() && value.chars().all(is_shell_safe) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Command line starting a recursive receiver that writes into `destination`.
///
/// `scp_program` is used as given so it may carry a wrapper or extra flags.
#[must_use]
pub fn receiver_command(scp_program: &str, destination: &str) -> String {
    format!("{} -tr {}", scp_program, shell_quote(destination))
}

/// Human readable text from a receiver's output streams.
///
/// The receiver acknowledges records on stdout with `\0` and prefixes warnings
/// and errors with `\x01` and `\x02`; those bytes are dropped.
#[must_use]
pub fn receiver_diagnostics(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout: Vec<u8> = stdout
        .iter()
        .copied()
        .filter(|byte| !matches!(*byte, 0..=2))
        .collect();
    let lines: Vec<String> = [stdout.as_slice(), stderr]
        .iter()
        .map(|data| String::from_utf8_lossy(data).trim().to_string())
        .filter(|text| !text.is_empty())
        .collect();
    lines.join("\n")
}
