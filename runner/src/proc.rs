use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use patchgate_common::errors::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

pub const SIGKILL_DELAY: Duration = Duration::from_secs(10);

/// Start `program` in its own process group with stdout and stderr going to `log`
pub fn spawn(
    program: &Path,
    args: &[String],
    envs: &BTreeMap<String, String>,
    cwd: &Path,
    log: &Path,
) -> Result<Child> {
    info!("Running {:?} {:?}", program, args);
    let stdout = File::create(log).with_context(|| anyhow!("Failed to create log file {:?}", log))?;
    let stderr = stdout.try_clone()?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(envs)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);

    unsafe {
        cmd.pre_exec(|| {
            // create a new process group
            nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
            Ok(())
        });
    }

    let child = cmd
        .spawn()
        .with_context(|| anyhow!("Failed to execute {:?}", program))?;
    Ok(child)
}

pub fn kill(pid: u32, signal: Signal) -> Result<()> {
    // convert 1234 to -1234 to kill grand-children too
    let pid = -(pid as i32);
    info!("Sending {} to child(pid={})", signal, pid);
    signal::kill(Pid::from_raw(pid), signal)?;
    Ok(())
}

/// A child that was asked to terminate and still needs to be waited for
pub struct Termination {
    child: Child,
    sigterm_sent: Instant,
    sigkill_sent: bool,
}

impl Termination {
    /// Send SIGTERM to the process group of the child
    pub fn start(child: Child) -> Result<Termination> {
        if let Some(pid) = child.id() {
            kill(pid, Signal::SIGTERM)?;
        }
        Ok(Termination {
            child,
            sigterm_sent: Instant::now(),
            sigkill_sent: false,
        })
    }

    /// Returns true once the child is gone, escalating to SIGKILL if it takes too long
    pub fn poll(&mut self) -> Result<bool> {
        if self.child.try_wait()?.is_some() {
            return Ok(true);
        }

        if !self.sigkill_sent && self.sigterm_sent.elapsed() > SIGKILL_DELAY {
            if let Some(pid) = self.child.id() {
                warn!("child(pid={}) didn't terminate {}s after SIGTERM, sending SIGKILL", pid, SIGKILL_DELAY.as_secs());
                kill(pid, Signal::SIGKILL)?;
            }
            self.sigkill_sent = true;
        }

        Ok(false)
    }

    pub async fn wait(mut self) -> Result<()> {
        loop {
            if self.poll()? {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
