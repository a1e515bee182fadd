// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io;
use std::process::Stdio;

use log::{info, warn};
use tokio::process::Command;

use crate::policy::ShutdownReason;

/// Powers off the host.
pub trait ShutdownTrigger: Send {
    /// Start the shutdown and return without waiting for it.
    fn fire(&mut self, reason: ShutdownReason) -> io::Result<()>;
}

/// Runs the configured command line through the platform shell.
#[derive(Debug, Clone)]
pub struct CommandShutdown {
    command: String,
}

impl CommandShutdown {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    #[cfg(windows)]
    fn shell(&self) -> Command {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(&self.command);
        cmd
    }

    #[cfg(not(windows))]
    fn shell(&self) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.command);
        cmd
    }
}

impl ShutdownTrigger for CommandShutdown {
    fn fire(&mut self, reason: ShutdownReason) -> io::Result<()> {
        info!("Running shutdown command ({}): {}", reason, self.command);

        // The child is left to the runtime to reap; the host is going down.
        let child = self
            .shell()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        match child.id() {
            Some(pid) => info!("Shutdown command started with pid {}", pid),
            None => warn!("Shutdown command exited immediately"),
        }
        Ok(())
    }
}

/// Logs the command it would run instead of running it.
#[derive(Debug, Clone)]
pub struct DryRunShutdown {
    command: String,
}

impl DryRunShutdown {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl ShutdownTrigger for DryRunShutdown {
    fn fire(&mut self, reason: ShutdownReason) -> io::Result<()> {
        warn!("Dry run, not executing shutdown ({}): {}", reason, self.command);
        Ok(())
    }
}
