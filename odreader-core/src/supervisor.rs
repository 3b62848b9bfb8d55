use log::debug;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Program plus leading arguments used to launch a sampler; the output and
/// state paths are appended per experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl SamplerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `<program> <args...> sample <output> <state>`
    pub fn for_experiment(&self, output: &Path, state: &Path) -> Self {
        self.clone()
            .arg("sample")
            .arg(output.as_os_str())
            .arg(state.as_os_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Terminated,
    NotFound,
}

pub trait ProcessSupervisor {
    /// Starts a detached process and returns its pid without waiting on it.
    fn spawn(&mut self, command: &SamplerCommand) -> io::Result<u32>;
    /// Asks the process to exit. A pid that no longer exists is not an error.
    fn terminate(&mut self, pid: u32) -> io::Result<Termination>;
    fn is_alive(&self, pid: u32) -> bool;
}

/// Real processes: own session, no stdio, reaped by a background thread.
#[derive(Debug, Default)]
pub struct OsSupervisor;

impl ProcessSupervisor for OsSupervisor {
    fn spawn(&mut self, command: &SamplerCommand) -> io::Result<u32> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        debug!("spawned {} as pid {pid}", command.program.display());
        Ok(pid)
    }

    fn terminate(&mut self, pid: u32) -> io::Result<Termination> {
        let Some(pid) = signalable(pid) else {
            return Ok(Termination::NotFound);
        };
        match send_signal(pid, SIGTERM) {
            Ok(()) => Ok(Termination::Terminated),
            Err(err) if err.raw_os_error() == Some(ESRCH) => Ok(Termination::NotFound),
            Err(err) => Err(err),
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Some(pid) = signalable(pid) else {
            return false;
        };
        match send_signal(pid, 0) {
            Ok(()) => true,
            Err(err) => err.raw_os_error() == Some(EPERM),
        }
    }
}

/// Signals to 0 or negative pids address process groups, never a sampler.
fn signalable(pid: u32) -> Option<i32> {
    i32::try_from(pid).ok().filter(|pid| *pid > 0)
}

#[cfg(unix)]
const SIGTERM: i32 = libc::SIGTERM;
#[cfg(unix)]
const ESRCH: i32 = libc::ESRCH;
#[cfg(unix)]
const EPERM: i32 = libc::EPERM;

#[cfg(unix)]
fn send_signal(pid: i32, signal: i32) -> io::Result<()> {
    if unsafe { libc::kill(pid, signal) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
const SIGTERM: i32 = 15;
#[cfg(not(unix))]
const ESRCH: i32 = 3;
#[cfg(not(unix))]
const EPERM: i32 = 1;

#[cfg(not(unix))]
fn send_signal(_pid: i32, _signal: i32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process signals are only supported on unix",
    ))
}
