use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use platesched::device::{Device, StatusPoller};
use platesched::operation::{OperationExecutor, OperationOutcome};
use platesched::operator::{ErrorChannel, OperatorInbox, operator_channel};
use platesched::planner::PathPlanner;
use platesched::plate::WorklistOutcome;
use platesched::scheduler::MoveEvent;
use platesched::sim::{SimLab, homing_operation};
use platesched::topology::LocationKey;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("platesched")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("platesched.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.unwrap_or("info")))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Simulate { auto, fail_transfers } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(handle_simulate_command(config, *auto, *fail_transfers, cli.is_verbose()))
        }
        Commands::Plan { from, to } => handle_plan_command(from, to, config),
        Commands::Check { json } => handle_check_command(config, *json),
    }
}

async fn handle_simulate_command(config: &Config, auto: bool, fail_transfers: u32, verbose: bool) -> Result<()> {
    let mut lab_config = config.lab.clone();
    if fail_transfers > 0 {
        for robot in &mut lab_config.robots {
            robot.fail_transfers = fail_transfers;
        }
    }
    let lab = SimLab::build(&lab_config).context("Failed to build simulated lab")?;
    info!("Simulating {} worklist(s)", lab_config.worklists.len());

    let (queue, inbox) = operator_channel();
    let errors: Arc<dyn ErrorChannel> = Arc::new(queue);
    let operator = if auto || config.operator.auto_respond {
        let responder = inbox.spawn_auto_responder(config.operator.preferences.clone());
        tokio::spawn(async move {
            let answered = responder.await.unwrap_or_default();
            info!("Auto responder answered {} error(s)", answered);
        })
    } else {
        tokio::spawn(prompt_operator(inbox))
    };

    println!("{}", "Homing robots...".cyan());
    let executor = OperationExecutor::spawn();
    let homing: Vec<_> = lab
        .robots()
        .iter()
        .map(|robot| {
            let op = homing_operation(robot, errors.clone(), &config.recovery);
            (robot.name().to_string(), executor.submit(op, robot.clone()))
        })
        .collect();
    for (robot, done) in homing {
        let outcome = done
            .await
            .context("Homing was dropped")?
            .context("Homing failed")?;
        if let OperationOutcome::Aborted { at } = outcome {
            executor.stop().await;
            return Err(eyre!("Homing {} aborted at step {}", robot, at + 1));
        }
        println!("  {} {}", "homed".green(), robot);
    }
    executor.stop().await;

    let poll = Duration::from_millis(config.operator.status_poll_ms);
    let mut pollers: Vec<_> = lab.robots().iter().map(|r| StatusPoller::spawn(r.clone(), poll)).collect();

    let (plates, supervisor) = lab.schedulers(config.scheduler.clone(), config.robot.clone(), errors.clone());
    let mut events = plates.robot_scheduler().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let MoveEvent::Exiting { plate, robot, from, to } = event
                && verbose
            {
                println!("  {} {} {} -> {} ({})", "moved".blue(), plate, from, to, robot);
            }
        }
    });
    let mut handle = supervisor.clone().spawn();

    let mut pending = Vec::new();
    for worklist in &lab_config.worklists {
        let mut worklist = worklist.clone();
        let done = worklist.completion();
        let name = worklist.name.clone();
        plates.enqueue_worklist(worklist).await.context("Failed to queue worklist")?;
        println!("{} {}", "Queued:".green(), name);
        pending.push((name, done));
    }

    let mut failed = 0;
    let mut aborted = None;
    for (name, done) in pending {
        let outcome = tokio::select! {
            outcome = done => outcome.ok(),
            result = &mut handle => {
                aborted = Some(result);
                None
            }
        };
        match outcome {
            Some(WorklistOutcome::Completed { plates }) => {
                println!("{} {} ({} plates)", "Completed:".green(), name, plates);
            }
            Some(WorklistOutcome::Failed { reason }) => {
                failed += 1;
                println!("{} {}: {}", "Failed:".red(), name, reason);
            }
            None => {
                failed += 1;
                println!("{} {}", "Abandoned:".red(), name);
            }
        }
        if aborted.is_some() {
            break;
        }
    }

    supervisor.stop();
    let result = match aborted {
        Some(result) => result,
        None => handle.await,
    };
    for poller in &mut pollers {
        poller.stop().await;
    }
    printer.abort();
    drop(errors);
    drop(plates);
    drop(supervisor);
    operator.abort();

    for robot in lab.robots() {
        println!(
            "{} {}: {} transfers, {} barcodes read",
            "Robot".cyan(),
            robot.name(),
            robot.transfers(),
            robot.barcodes_read()
        );
    }
    for device in lab.devices() {
        println!("{} {}: {} jobs", "Device".cyan(), device.name(), device.jobs_run());
    }

    result.context("Supervisor task panicked")?.context("Scheduling aborted")?;
    if failed > 0 {
        return Err(eyre!("{} worklist(s) did not complete", failed));
    }
    Ok(())
}

/// Put each operator error to the terminal until it is resolved.
async fn prompt_operator(mut inbox: OperatorInbox) {
    while let Some(mut pending) = inbox.next().await {
        let report = pending.report().clone();
        println!("{} {}", "Operator attention:".red().bold(), report.message);
        if let Some(details) = &report.details {
            println!("  {}", details);
        }
        loop {
            println!("Choose one of: {}", report.options.join(" / "));
            let line = tokio::task::spawn_blocking(|| {
                let mut line = String::new();
                std::io::stdin().read_line(&mut line).map(|n| (n, line))
            })
            .await;
            let choice = match line {
                Ok(Ok((n, line))) if n > 0 => line.trim().to_string(),
                // stdin closed: leave the error unanswered
                _ => return,
            };
            match pending.resolve(&choice) {
                Ok(()) => break,
                Err(e) => println!("{}", e.to_string().yellow()),
            }
        }
    }
}

fn handle_plan_command(from: &str, to: &str, config: &Config) -> Result<()> {
    info!("Planning path from {} to {}", from, to);
    let parse = |text: &str| LocationKey::parse(text).ok_or_else(|| eyre!("Expected device.location, got '{}'", text));
    let (from, to) = (parse(from)?, parse(to)?);

    let lab = SimLab::build(&config.lab).context("Failed to build simulated lab")?;
    let mut planner = PathPlanner::new(lab.registry().clone());
    planner.build_world();

    let path = planner.plan_between(&from, &to)?;
    println!("{} {} -> {} (cost {})", "Path:".green(), from, to, path.cost);
    for hop in path.hops.iter().filter(|h| h.changes_location()) {
        println!("  {}", hop);
    }
    Ok(())
}

#[derive(Debug, Default, Serialize)]
struct CheckReport {
    places: usize,
    edges: usize,
    disconnected: Vec<String>,
    missing: Vec<MissingDevice>,
}

#[derive(Debug, Serialize)]
struct MissingDevice {
    worklist: String,
    device_type: String,
}

impl CheckReport {
    fn problems(&self) -> usize {
        self.disconnected.len() + self.missing.len()
    }
}

fn handle_check_command(config: &Config, json: bool) -> Result<()> {
    let lab = SimLab::build(&config.lab).context("Failed to build simulated lab")?;
    let mut planner = PathPlanner::new(lab.registry().clone());
    let world = planner.build_world();
    let mut report = CheckReport {
        places: world.place_count(),
        edges: world.edge_count(),
        ..CheckReport::default()
    };
    report.disconnected = planner.disconnected_places().iter().map(ToString::to_string).collect();

    let products = lab.registry().products();
    for worklist in &config.lab.worklists {
        for device_type in worklist.required_device_types() {
            if !products.contains(&device_type) {
                report.missing.push(MissingDevice {
                    worklist: worklist.name.clone(),
                    device_type,
                });
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report).context("Failed to encode report")?);
    } else {
        println!("{} {} places, {} robot edges", "World:".cyan(), report.places, report.edges);
        for place in &report.disconnected {
            println!("{} {} has no robot access", "Disconnected:".yellow(), place);
        }
        for missing in &report.missing {
            println!("{} {} needs '{}'", "Missing:".red(), missing.worklist, missing.device_type);
        }
    }

    if report.problems() > 0 {
        return Err(eyre!("{} problem(s) found", report.problems()));
    }
    if !json {
        println!("{}", "Lab OK".green());
    }
    Ok(())
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging at the configured level
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
