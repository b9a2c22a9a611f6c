//! Parley voice channel client
//!
//! Joins one voice channel from a terminal, logs what happens, and leaves on
//! Ctrl+C.

mod args;

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use parley_client::{
    ClientConfig, CpalDevices, DeviceDirection, LoggingPlayback, MediaDevices, PresenceMap,
    SessionController, SessionEvent, VoiceError, WebSocketSignaling,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use args::Args;

/// Log filter used when neither `--log-level` nor `RUST_LOG` is set
const DEFAULT_LOG_FILTER: &str = "info";

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    if args.list_devices {
        return list_devices(&CpalDevices::new());
    }
    let Some(channel) = args.channel.clone() else {
        error!("no channel given");
        return ExitCode::FAILURE;
    };

    let config = load_config(&args);
    info!(url = %config.signaling_url, participant = %config.participant_id, "connecting");

    let signaling = match WebSocketSignaling::connect(&config.signaling_url, config.timeouts.clone()).await {
        Ok(signaling) => Arc::new(signaling),
        Err(e) => {
            error!(error = %e, "cannot reach signaling server");
            return ExitCode::FAILURE;
        }
    };

    let controller = SessionController::new(
        &config,
        signaling,
        Arc::new(CpalDevices::new()),
        Arc::new(PresenceMap::new()),
        Arc::new(LoggingPlayback),
    );
    controller.start();

    if let Some(output) = config.devices.output() {
        if let Err(e) = controller
            .change_device(Some(output), DeviceDirection::Output)
            .await
        {
            warn!(device = %output, error = %e, "keeping the default playback device");
        }
    }

    let mut events = controller.events();
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    match join_or_interrupt(&controller, &channel, interrupt).await {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            error!(channel = %channel, error = %e, "cannot join voice channel");
            return ExitCode::FAILURE;
        }
        None => {
            warn!(channel = %channel, "interrupted while joining");
            return ExitCode::FAILURE;
        }
    }
    info!(channel = %channel, "press Ctrl+C to leave");

    let forced = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "cannot listen for Ctrl+C");
            }
            false
        }
        reason = watch_events(&mut events) => {
            error!(reason = %reason, "voice session ended");
            true
        }
    };

    if forced {
        return ExitCode::FAILURE;
    }
    controller.leave().await;
    ExitCode::SUCCESS
}

/// Install the tracing subscriber
///
/// `--log-level` wins over `RUST_LOG`, which wins over the default.
fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|e| {
            eprintln!("Invalid log filter '{level}': {e}");
            EnvFilter::new(DEFAULT_LOG_FILTER)
        }),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Load the config file and apply command-line overrides
///
/// A participant id is generated and persisted on first run.
fn load_config(args: &Args) -> ClientConfig {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from(path),
        None => ClientConfig::load(),
    };

    if config.participant_id.is_empty() {
        config.participant_id = Uuid::new_v4().to_string();
        let saved = match &args.config {
            Some(path) => config.save_to(path),
            None => config.save(),
        };
        match saved {
            Ok(()) => info!(participant = %config.participant_id, "generated participant id"),
            Err(e) => warn!(error = %e, "generated participant id was not saved"),
        }
    }

    if let Some(url) = &args.url {
        config.signaling_url = url.clone();
    }
    if let Some(participant) = &args.participant {
        config.participant_id = participant.clone();
    }
    if let Some(input) = &args.input_device {
        config.devices.input_device = input.clone();
    }
    if let Some(output) = &args.output_device {
        config.devices.output_device = output.clone();
    }
    config
}

/// Join `channel` unless `interrupt` fires first
///
/// An interrupted join is abandoned and everything it acquired released;
/// `None` is returned in that case.
async fn join_or_interrupt(
    controller: &SessionController,
    channel: &str,
    interrupt: impl Future<Output = ()>,
) -> Option<Result<(), VoiceError>> {
    let joined = tokio::select! {
        result = controller.join(channel) => Some(result),
        () = interrupt => None,
    };
    if joined.is_none() {
        controller.leave().await;
    }
    joined
}

/// Resolves with a reason once the session is torn down underneath us
async fn watch_events(events: &mut broadcast::Receiver<SessionEvent>) -> String {
    loop {
        match events.recv().await {
            Ok(SessionEvent::ForcedLeave { reason }) => return reason,
            Ok(SessionEvent::ConsumeFailed {
                producer_id,
                reason,
            }) => warn!(producer = %producer_id, reason = %reason, "remote audio unavailable"),
            Ok(SessionEvent::ConnectionDegraded) => warn!("connection degraded"),
            Ok(SessionEvent::ConnectionRestored) => info!("connection restored"),
            Ok(SessionEvent::PhaseChanged(_)) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => {
                return "session controller stopped".to_string();
            }
        }
    }
}

fn list_devices(devices: &dyn MediaDevices) -> ExitCode {
    let listed = devices
        .input_devices()
        .and_then(|inputs| Ok((inputs, devices.output_devices()?)));
    match listed {
        Ok((inputs, outputs)) => {
            println!("Input devices:");
            for device in inputs {
                println!("  {device}");
            }
            println!("Output devices:");
            for device in outputs {
                println!("  {device}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "cannot enumerate audio devices");
            ExitCode::FAILURE
        }
    }
}
