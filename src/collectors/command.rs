//! External command invocation
//!
//! One-shot listings go through the [`CommandRunner`] trait so they can be
//! replaced in tests. Long-lived readers use [`spawn_merged`], which joins the
//! child's stdout and stderr onto a single non-blocking pipe.

use crate::error::CollectorError;
use log::debug;
use std::fs::File;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

/// Program, arguments and extra environment of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    /// Add an environment variable for the child
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Runs a command to completion and returns its standard output
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<String, CollectorError>;
}

/// [`CommandRunner`] backed by real processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<String, CollectorError> {
        debug!("Running {}", spec);
        let output = spec
            .command()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CollectorError::SubprocessSpawn(format!("{}: {}", spec, e)))?;

        if !output.status.success() {
            return Err(CollectorError::CommandFailed {
                command: spec.to_string(),
                status: output.status.to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn set_fd_flag(file: &File, get: libc::c_int, set: libc::c_int, flag: libc::c_int) -> std::io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: fd is owned by `file` and stays open for the duration of the calls
    unsafe {
        let flags = libc::fcntl(fd, get);
        if flags < 0 || libc::fcntl(fd, set, flags | flag) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Spawn `spec` with stdout and stderr on one pipe
///
/// Returns the child and the non-blocking read end of the pipe. The parent's
/// copies of the write end are closed before returning, so the reader sees EOF
/// once the child exits. The child gets SIGTERM when the spawning thread dies,
/// so it never outlives us.
pub fn spawn_merged(spec: &CommandSpec) -> Result<(Child, File), CollectorError> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` has room for the two descriptors pipe(2) writes
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(CollectorError::IoError(std::io::Error::last_os_error()));
    }
    // SAFETY: both descriptors were just created and are owned by nothing else
    let (reader, writer) = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
    set_fd_flag(&reader, libc::F_GETFD, libc::F_SETFD, libc::FD_CLOEXEC)?;
    set_fd_flag(&writer, libc::F_GETFD, libc::F_SETFD, libc::FD_CLOEXEC)?;

    let child = {
        let mut command = spec.command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer.try_clone()?))
            .stderr(Stdio::from(writer));
        // SAFETY: the hook only calls prctl(2), which is async-signal-safe
        unsafe {
            command.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        command
            .spawn()
            .map_err(|e| CollectorError::SubprocessSpawn(format!("{}: {}", spec, e)))?
    };

    set_fd_flag(&reader, libc::F_GETFL, libc::F_SETFL, libc::O_NONBLOCK)?;
    Ok((child, reader))
}
