// src/exec/process.rs

//! OS process plumbing: spawning, signalling and line streaming.

use std::io;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info};

use crate::errors::{KindleError, Result};
use crate::exec::broadcast::OutputBroadcaster;

/// Spawn `command` (argv style) with stdout and stderr captured.
///
/// The child inherits the environment and stdin. It is killed if its handle
/// is dropped, so an abandoned run never leaks a process.
pub fn spawn(task: &str, command: &[String]) -> Result<Child> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| KindleError::ConfigError(format!("task '{task}' has an empty command")))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.spawn().map_err(|source| KindleError::Spawn {
        task: task.to_string(),
        source,
    })
}

/// Ask the process to stop (SIGINT on unix).
///
/// A process that is already gone is not an error.
pub fn interrupt(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };

    #[cfg(unix)]
    {
        send_signal(pid, libc::SIGINT)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        kill(child)
    }
}

/// Force the process down (SIGKILL on unix).
///
/// A process that is already gone is not an error.
pub fn kill(child: &mut Child) -> io::Result<()> {
    match child.start_kill() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
        Err(e) if is_no_such_process(&e) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

    // SAFETY: kill(2) only takes plain integers and has no memory effects.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if is_no_such_process(&err) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(unix)]
fn is_no_such_process(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn is_no_such_process(_err: &io::Error) -> bool {
    false
}

/// Read `reader` line by line, logging every line and publishing it to
/// `output`, until end of stream.
///
/// Lines are decoded as UTF-8 lossily, so a malformed line is still
/// delivered instead of ending the stream. Surrounding whitespace, line
/// terminator included, is trimmed. A read error ends the stream and
/// is logged.
pub async fn pump_lines<R>(
    task: &str,
    stream: &'static str,
    reader: Option<R>,
    output: &OutputBroadcaster,
) where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        debug!(task = %task, stream, "no pipe attached; nothing to stream");
        return;
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let decoded = String::from_utf8_lossy(&buf);
                let line = decoded.trim();
                info!(task = %task, stream, "{}", line);
                output.publish(line);
            }
            Err(e) => {
                error!(task = %task, stream, error = %e, "failed to read process output");
                break;
            }
        }
    }

    debug!(task = %task, stream, "output stream ended");
}
