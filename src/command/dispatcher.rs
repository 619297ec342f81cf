//! Command dispatcher - decodes inbound commands and drives the restart action

use crate::action::{ActionOutcome, NetworkAction};
use crate::session::MessageReceiver;
use crate::status::StatusReporter;
use restart4g_shared::codec::{self, Command};
use restart4g_shared::Status;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// What started a restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// `restart4g` received on the command topic
    Remote,
    /// Local request bypassing the broker
    Manual,
}

/// Notifications for the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    CommandReceived { token: String },
    UnknownCommand { payload: String },
    ActionFinished { trigger: Trigger, outcome: ActionOutcome },
}

/// Routes command payloads to the network action
pub struct CommandDispatcher {
    reporter: StatusReporter,
    command_topic: String,
    requests: mpsc::UnboundedSender<Trigger>,
    events: broadcast::Sender<DispatchEvent>,
}

impl CommandDispatcher {
    /// Create a dispatcher and start its action worker
    pub fn new(
        reporter: StatusReporter,
        command_topic: impl Into<String>,
        action: Arc<dyn NetworkAction>,
    ) -> Self {
        let (requests, queue) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);

        tokio::spawn(run_worker(queue, action, reporter.clone(), events.clone()));

        Self {
            reporter,
            command_topic: command_topic.into(),
            requests,
            events,
        }
    }

    /// Subscribe to dispatch notifications
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    /// Consume inbound messages until the session manager goes away
    pub async fn run(&self, mut messages: MessageReceiver) {
        while let Some(message) = messages.recv().await {
            self.on_message(&message.topic, &message.payload).await;
        }
        debug!("[DISPATCH] Inbound message stream closed");
    }

    /// Handle one inbound publish
    pub async fn on_message(&self, topic: &str, payload: &[u8]) {
        if topic != self.command_topic {
            warn!("[DISPATCH] Ignoring message on unexpected topic {}", topic);
            return;
        }

        match codec::decode_command(payload) {
            Command::Restart4g => {
                let token = Command::Restart4g.token().to_string();
                info!("[DISPATCH] Received {}", token);
                self.reporter
                    .report(&Status::CommandReceived(token.clone()))
                    .await;
                let _ = self.events.send(DispatchEvent::CommandReceived { token });
                self.enqueue(Trigger::Remote);
            }
            Command::Unknown(payload) => {
                warn!("[DISPATCH] Unknown command: {:?}", payload);
                self.reporter
                    .report(&Status::UnknownCommand(payload.clone()))
                    .await;
                let _ = self.events.send(DispatchEvent::UnknownCommand { payload });
            }
        }
    }

    /// Restart requested locally
    pub async fn trigger_restart(&self) {
        info!("[DISPATCH] Manual restart requested");
        self.reporter.report(&Status::Restarting).await;
        self.enqueue(Trigger::Manual);
    }

    fn enqueue(&self, trigger: Trigger) {
        if self.requests.send(trigger).is_err() {
            error!("[DISPATCH] Action worker has stopped, dropping {:?} restart", trigger);
        }
    }
}

/// Runs queued restarts one at a time
async fn run_worker(
    mut queue: mpsc::UnboundedReceiver<Trigger>,
    action: Arc<dyn NetworkAction>,
    reporter: StatusReporter,
    events: broadcast::Sender<DispatchEvent>,
) {
    while let Some(trigger) = queue.recv().await {
        let action = action.clone();
        let outcome = match tokio::spawn(async move { action.restart().await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[DISPATCH] Restart task failed: {}", e);
                ActionOutcome::Failure(format!("action aborted: {}", e))
            }
        };

        match &outcome {
            ActionOutcome::Success => info!("[DISPATCH] Restart succeeded ({:?})", trigger),
            other => warn!("[DISPATCH] Restart did not succeed ({:?}): {:?}", trigger, other),
        }

        reporter.report(&outcome.status()).await;
        let _ = events.send(DispatchEvent::ActionFinished { trigger, outcome });
    }
}
