//! Simulated switch speaker.
//!
//! Stands in for the switch-facing agents: every command is answered after
//! a fixed delay, with a failure for switches configured to refuse.

use std::collections::HashSet;
use std::time::Duration;

use common::SwitchId;
use saga::SpeakerResponse;
use tokio::sync::mpsc;

use crate::{fabric::SpeakerCommand, runtime::ShardRouter};

pub struct SimulatedSpeaker {
    commands: mpsc::UnboundedReceiver<SpeakerCommand>,
    router: ShardRouter,
    delay: Duration,
    failing: HashSet<SwitchId>,
}

impl SimulatedSpeaker {
    pub fn new(
        commands: mpsc::UnboundedReceiver<SpeakerCommand>,
        router: ShardRouter,
        delay: Duration,
        failing: impl IntoIterator<Item = SwitchId>,
    ) -> Self {
        Self {
            commands,
            router,
            delay,
            failing: failing.into_iter().collect(),
        }
    }

    fn answer(&self, command: &SpeakerCommand) -> SpeakerResponse {
        let switch_id = command.request.switch_id;
        if self.failing.contains(&switch_id) {
            SpeakerResponse::failure(
                command.key.command_id,
                switch_id,
                format!("switch {switch_id} refused the command"),
            )
        } else {
            SpeakerResponse::success(command.key.command_id, switch_id)
        }
    }

    /// Answers commands until every carrier is dropped.
    pub async fn run(mut self) {
        tracing::info!(delay_ms = self.delay.as_millis() as u64, "simulated speaker started");
        while let Some(command) = self.commands.recv().await {
            metrics::counter!("speaker_commands_total", "kind" => command.request.kind.as_str())
                .increment(1);
            let response = self.answer(&command);
            let router = self.router.clone();
            let delay = self.delay;
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                router.deliver(command.key, response).await;
            });
        }
        tracing::info!("simulated speaker stopped");
    }
}
