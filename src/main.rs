//! CLI for Fleetlink
//!
//! Subcommands:
//! - `monitor`: stream one vehicle's telemetry until Ctrl-C, then print a summary
//! - `send`: publish a single control command to one vehicle (`--dry-run`
//!   only prints what would be published)

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use fleetlink::command::{CommandPublisher, CommandRequest};
use fleetlink::config::{Settings, load_config};
use fleetlink::report::{ConsolePresenter, render_summary};
use fleetlink::session::{AmqpSession, Broker, RetryPolicy};
use fleetlink::telemetry::Dispatcher;
use fleetlink::topic::{Command, VehicleId, queue_for};
use fleetlink::utils::{FleetError, Result, logging};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "fleetlink", version)]
enum Cli {
    /// Print live telemetry for a vehicle until interrupted
    Monitor {
        /// Vehicle identifier, e.g. B1234ABC
        vehicle_id: String,
        /// Retry the initial broker connection with backoff
        #[arg(long)]
        retry: bool,
    },
    /// Send one control command to a vehicle
    Send {
        vehicle_id: String,
        #[arg(value_enum)]
        command: CommandArg,
        /// Order id for start_rent (generated when omitted)
        order_id: Option<String>,
        #[arg(long)]
        retry: bool,
        /// Publish into an in-process broker and print the message instead
        #[arg(long, conflicts_with = "retry")]
        dry_run: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CommandArg {
    #[value(name = "start_rent", alias = "start")]
    StartRent,
    #[value(name = "end_rent", alias = "end")]
    EndRent,
    #[value(name = "kill_vehicle", alias = "kill")]
    KillVehicle,
}

impl From<CommandArg> for Command {
    fn from(arg: CommandArg) -> Self {
        match arg {
            CommandArg::StartRent => Command::StartRent,
            CommandArg::EndRent => Command::EndRent,
            CommandArg::KillVehicle => Command::KillVehicle,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Invalid configuration: {e}");
            eprintln!("error: invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log.level);

    let outcome = match cli {
        Cli::Monitor { vehicle_id, retry } => run_monitor(&settings, &vehicle_id, retry).await,
        Cli::Send {
            vehicle_id,
            command,
            order_id,
            retry,
            dry_run,
        } => {
            let target = if dry_run {
                Target::DryRun
            } else {
                Target::Broker { retry }
            };
            run_send(&settings, &vehicle_id, command.into(), order_id, target).await
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Where `send` publishes.
#[derive(Clone, Copy)]
enum Target {
    Broker { retry: bool },
    DryRun,
}

async fn connect(settings: &Settings, retry: bool) -> Result<Arc<dyn Broker>> {
    let mut retry_settings = settings.retry.clone();
    retry_settings.enabled |= retry;
    let policy = RetryPolicy::from_settings(&retry_settings);
    let session = AmqpSession::connect_with_retry(&settings.broker, &policy).await?;
    Ok(Arc::new(session))
}

async fn run_monitor(settings: &Settings, vehicle_id: &str, retry: bool) -> Result<()> {
    let vehicle = VehicleId::parse(vehicle_id)?;
    let session = connect(settings, retry).await?;

    let mut dispatcher = match Dispatcher::start(
        session.clone(),
        &settings.broker.exchange,
        vehicle.clone(),
        Arc::new(ConsolePresenter::new(vehicle)),
    )
    .await
    {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            close(session.as_ref()).await;
            return Err(e);
        }
    };
    println!("Monitoring vehicle {} (Ctrl-C to stop)", dispatcher.vehicle());

    let failure = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Stopping.");
            None
        }
        failure = dispatcher.failure() => failure,
    };

    let snapshot = dispatcher.stop().await;
    println!("{}", render_summary(&snapshot));
    close(session.as_ref()).await;

    match failure {
        Some(failure) => Err(FleetError::Consume {
            queue: queue_for(failure.topic)?.to_string(),
            reason: failure.reason,
        }),
        None => Ok(()),
    }
}

async fn run_send(
    settings: &Settings,
    vehicle_id: &str,
    command: Command,
    order_id: Option<String>,
    target: Target,
) -> Result<()> {
    if order_id.is_some() && command != Command::StartRent {
        warn!("Order id is only used by start_rent; ignoring it");
    }
    let request = match command {
        Command::StartRent => CommandRequest::start_rent(vehicle_id, order_id.as_deref()),
        Command::EndRent => CommandRequest::end_rent(vehicle_id),
        Command::KillVehicle => CommandRequest::kill_vehicle(vehicle_id),
    };
    // reject bad ids before touching the network
    VehicleId::parse(vehicle_id)?;

    let exchange = settings.broker.exchange.clone();
    let (publisher, session): (CommandPublisher, Arc<dyn Broker>) = match target {
        Target::Broker { retry } => {
            let session = connect(settings, retry).await?;
            (CommandPublisher::new(session.clone(), exchange), session)
        }
        Target::DryRun => {
            let (publisher, broker) = CommandPublisher::dry_run(exchange);
            (publisher, Arc::new(broker))
        }
    };
    let sent = publisher.send(request).await;
    close(session.as_ref()).await;

    let sent = sent?;
    match target {
        Target::Broker { .. } => println!(
            "Sent {} to vehicle {} via {} ({})",
            sent.command, sent.vehicle, sent.exchange, sent.routing_key
        ),
        Target::DryRun => println!(
            "Dry run, nothing sent. Would publish to {} with key {}:\n{}",
            sent.exchange, sent.routing_key, sent.body
        ),
    }
    Ok(())
}

async fn close(session: &dyn Broker) {
    if let Err(e) = session.close().await {
        warn!("Closing broker session failed: {e}");
    }
}
