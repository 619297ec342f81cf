mod action;
mod command;
mod config;
mod error;
mod session;
mod status;
mod transport;

use action::{MobileDataController, ProcessShell};
use clap::Parser;
use command::{CommandDispatcher, DispatchEvent};
use config::AgentConfig;
use session::{SessionEvent, SessionManager};
use status::StatusReporter;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use transport::{Backoff, MqttConnector};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = AgentConfig::parse();
    let topics = config.topics();

    info!("Device agent starting: {}", config.device_id);
    info!("  Command topic: {}", topics.command);
    info!("  Status topic: {}", topics.status);

    let connector = Arc::new(MqttConnector::new(Backoff::default()));
    let (sessions, messages) = SessionManager::new(config.session(), connector);

    let shell = Arc::new(ProcessShell::new(config.shell()));
    let controller = Arc::new(
        MobileDataController::new(shell)
            .with_commands(config.commands())
            .with_settle(config.settle()),
    );
    let reporter = StatusReporter::new(sessions.handle(), topics.clone());
    let dispatcher = Arc::new(CommandDispatcher::new(
        reporter.clone(),
        topics.command.clone(),
        controller.clone(),
    ));

    tokio::spawn(render_session_events(sessions.subscribe()));
    tokio::spawn(render_dispatch_events(dispatcher.subscribe()));

    let pump = dispatcher.clone();
    tokio::spawn(async move {
        pump.run(messages).await;
    });

    if let Some(broker) = &config.broker {
        connect(&sessions, broker).await;
    }

    info!("Commands: connect <address> | disconnect | restart | state | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if !handle_line(line.trim(), &sessions, &dispatcher, &controller).await {
                        break;
                    }
                }
                None => {
                    info!("stdin closed, running until interrupted");
                    stdin_open = false;
                }
            },
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Interrupted");
                break;
            }
        }
    }

    sessions.disconnect().await;
    info!(
        "Device agent stopped ({} status reports dropped)",
        reporter.dropped_count()
    );
    Ok(())
}

/// Execute one interactive command; returns false to exit
async fn handle_line(
    line: &str,
    sessions: &SessionManager,
    dispatcher: &CommandDispatcher,
    controller: &MobileDataController,
) -> bool {
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));

    match verb {
        "" => {}
        "connect" => connect(sessions, rest.trim()).await,
        "disconnect" => sessions.disconnect().await,
        "restart" => dispatcher.trigger_restart().await,
        "state" => {
            match sessions.session().await {
                Some(session) => info!(
                    "State: {} ({} as {})",
                    sessions.state().await,
                    session.address,
                    session.client_id
                ),
                None => info!("State: {}", sessions.state().await),
            }
            info!("Mobile data: {:?}", controller.network_state().await);
        }
        "quit" | "exit" => return false,
        other => warn!("Unknown command: {}", other),
    }
    true
}

async fn connect(sessions: &SessionManager, address: &str) {
    match sessions.connect(address).await {
        Ok(session) => info!("Connecting to {} as {}", session.address, session.client_id),
        Err(e) => error!("Connect failed: {}", e),
    }
}

/// Render session events as the status line a UI would show
async fn render_session_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::StateChanged { from, to }) => {
                info!("[MAIN] Connection: {} -> {}", from, to);
            }
            Ok(SessionEvent::Established { server, reconnect }) => {
                if reconnect {
                    info!("[MAIN] Reconnected to {}", server);
                } else {
                    info!("[MAIN] Connected to {}", server);
                }
            }
            Ok(SessionEvent::ConnectFailed(failure)) => {
                error!("[MAIN] Connection failed: {}", failure);
            }
            Ok(SessionEvent::ConnectionLost { reason }) => {
                warn!("[MAIN] Connection lost: {}", reason);
            }
            Ok(SessionEvent::SubscribeFailed { topic, reason }) => {
                error!("[MAIN] Not listening on {}: {}", topic, reason);
            }
            Err(RecvError::Lagged(n)) => warn!("[MAIN] Missed {} session events", n),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn render_dispatch_events(mut events: broadcast::Receiver<DispatchEvent>) {
    loop {
        match events.recv().await {
            Ok(DispatchEvent::CommandReceived { token }) => {
                info!("[MAIN] Command received: {}", token);
            }
            Ok(DispatchEvent::UnknownCommand { payload }) => {
                warn!("[MAIN] Unknown command: {}", payload);
            }
            Ok(DispatchEvent::ActionFinished { trigger, outcome }) => {
                info!("[MAIN] {:?} restart finished: {}", trigger, outcome.status());
            }
            Err(RecvError::Lagged(n)) => warn!("[MAIN] Missed {} dispatch events", n),
            Err(RecvError::Closed) => break,
        }
    }
}
