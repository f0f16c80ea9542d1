// Helper utilities for az-hibernate-agent
// SPDX-License-Identifier: GPL-3.0-or-later

use std::ffi::OsStr;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use nix::unistd::{access, AccessFlags};
use thiserror::Error;

use crate::defaults;
use crate::info;
use crate::log::Logger;

#[derive(Error, Debug)]
pub enum HelperError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Could not spawn {0}: {1}")]
    Spawn(String, io::Error),
    #[error("Command failed: {0}")]
    CommandFailed(String),
    #[error("Not running as root")]
    NotRoot,
}

pub type Result<T> = std::result::Result<T, HelperError>;

/// Check if running as root
pub fn am_i_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(HelperError::NotRoot)
    }
}

/// Read the first line of a file without its trailing newline.
/// Returns `None` if the file can't be opened or is empty.
pub fn read_first_line<P: AsRef<Path>>(path: P) -> Option<String> {
    let file = fs::File::open(path).ok()?;
    let mut line = String::new();
    match BufReader::new(file).read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches('\n').to_string()),
    }
}

/// Replace `path` with `content` by writing a sibling temporary file and
/// renaming it over the original. Permission bits of an existing file are
/// kept, new files get `new_mode`.
///
/// Returns `false` without touching the disk if the content is unchanged.
pub fn replace_file<P: AsRef<Path>>(path: P, content: &str, new_mode: u32) -> Result<bool> {
    let path = path.as_ref();

    let mode = match fs::metadata(path) {
        Ok(meta) => {
            if fs::read(path).map(|old| old == content.as_bytes()).unwrap_or(false) {
                return Ok(false);
            }
            meta.permissions().mode() & 0o7777
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => new_mode,
        Err(e) => return Err(e.into()),
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.az-hibernate-agent.tmp", file_name));

    let written = (|| -> io::Result<()> {
        let mut tmp = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&tmp_path)?;
        tmp.write_all(content.as_bytes())?;
        tmp.set_permissions(fs::Permissions::from_mode(mode))?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(true)
}

/// Undo the octal escaping the kernel applies to whitespace and backslashes
/// in /proc/mounts and /proc/swaps (`\040` for a space and so on).
pub fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + (d - b'0') as u32);
                if value <= 0xff {
                    out.push(value as u8);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Find an executable in `path_env` (colon separated). Relative and empty
/// segments are skipped.
pub fn find_executable_in(name: &str, path_env: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_env)
        .filter(|dir| dir.is_absolute())
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file() && access(candidate, AccessFlags::X_OK).is_ok())
}

/// Find an executable in `$PATH`, or in the standard system directories
/// when `$PATH` is unset.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    match std::env::var_os("PATH") {
        Some(path_env) => find_executable_in(name, &path_env),
        None => find_executable_in(name, OsStr::new(defaults::DEFAULT_PATH)),
    }
}

pub fn is_exec_in_path(name: &str) -> bool {
    find_executable(name).is_some()
}

/// How a spawned program ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    /// The shell convention for "command not found"
    NotFound,
    Code(i32),
    Signal(i32),
}

impl Exit {
    pub fn classify(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => Exit::Success,
            Some(127) => Exit::NotFound,
            Some(code) => Exit::Code(code),
            None => Exit::Signal(status.signal().unwrap_or(0)),
        }
    }

    fn describe(self, program: &str) -> String {
        match self {
            Exit::Success => format!("{} finished successfully", program),
            Exit::NotFound => format!("Failed to spawn {}", program),
            Exit::Code(code) => format!("{} ended with unexpected exit code {}", program, code),
            Exit::Signal(sig) => format!("{} ended abnormally (signal {})", program, sig),
        }
    }
}

/// Spawn `program` (a name looked up in `$PATH`, or a path) with `args` and
/// wait for it to finish. Any outcome other than a zero exit status is an error.
pub fn spawn_and_wait<P: AsRef<OsStr>, S: AsRef<OsStr>>(program: P, args: &[S], log: Logger) -> Result<()> {
    let program = program.as_ref();
    let name = program.to_string_lossy();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| HelperError::Spawn(name.to_string(), e))?;

    info!(log, "Waiting for {} (pid {}) to finish.", name, child.id());

    let exit = Exit::classify(child.wait()?);
    match exit {
        Exit::Success => {
            info!(log, "{}.", exit.describe(&name));
            Ok(())
        }
        _ => Err(HelperError::CommandFailed(exit.describe(&name))),
    }
}

/// Like `spawn_and_wait`, but failures are logged and reported as `false`.
pub fn try_spawn_and_wait<P: AsRef<OsStr>, S: AsRef<OsStr>>(program: P, args: &[S], log: Logger) -> bool {
    match spawn_and_wait(program, args, log) {
        Ok(()) => true,
        Err(e) => {
            info!(log, "{}", e);
            false
        }
    }
}
