use tracing::warn;
use tryit_util::Console;

use crate::adb::DeviceBridge;
use crate::agent::AgentIdentity;
use crate::error::{Result, TargetError};

/// Starts the agent and hands the terminal to a device shell.
pub struct SessionLauncher<'a> {
    console: &'a dyn Console,
    bridge: &'a dyn DeviceBridge,
}

impl<'a> SessionLauncher<'a> {
    pub fn new(console: &'a dyn Console, bridge: &'a dyn DeviceBridge) -> Self {
        Self { console, bridge }
    }

    pub async fn start_agent(&self, identity: &AgentIdentity) -> Result<()> {
        self.console.say("Starting Agent ...");
        match self.bridge.start_activity(&identity.component()).await {
            Ok(()) => Ok(()),
            Err(TargetError::ToolFailed { status, detail, .. }) => {
                warn!("am start exited with {status}: {}", detail.trim());
                self.console
                    .say(&format!("Unable to start {}", identity.component()));
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn attach_shell(&self) -> Result<()> {
        self.console.say("Connected to device shell");
        self.bridge.interactive_shell().await
    }

    /// Launches the agent, then blocks in the shell until the operator leaves it.
    pub async fn run(&self, identity: &AgentIdentity) -> Result<()> {
        self.start_agent(identity).await?;
        self.attach_shell().await?;
        self.console.say("Good Bye!");
        Ok(())
    }
}
