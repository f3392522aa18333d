// src/lib.rs

pub mod api;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod state;
pub mod trigger;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, config_root_dir, load_and_validate};
use crate::engine::{Orchestrator, RuntimeOptions, SchedulerEvent};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and validation
/// - state restore, scheduler and monitor loop
/// - (optional) artifact watcher
/// - the HTTP control API (not in `--once` mode)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {:?}", config_path))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    if let Some(listen) = args.listen {
        cfg.settings.listen = listen;
    }
    let settings = cfg.settings.clone();
    let root = config_root_dir(&config_path);

    let orchestrator = Orchestrator::builder(cfg).root(&root).build()?;
    let orchestrator = orchestrator.with_options(RuntimeOptions {
        tick_interval: settings.tick_interval,
        exit_when_idle: args.once,
        ..RuntimeOptions::default()
    });

    let events = orchestrator.events();
    let control = orchestrator.control();

    // Optional artifact watcher (disabled in --once mode).
    let _watcher_handle = if settings.watch_artifacts && !args.once {
        match crate::watch::spawn_watcher(orchestrator.scheduler().graph(), &root, events.clone()) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, "artifact watcher unavailable; relying on polling");
                None
            }
        }
    } else {
        None
    };

    // Ctrl-C → graceful shutdown of the loop and the HTTP server.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    {
        let events = events.clone();
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl-C received; shutting down");
            let _ = shutdown_tx.send(true);
            let _ = events.send(SchedulerEvent::ShutdownRequested).await;
        });
    }

    let server = if args.once {
        None
    } else {
        let listener = TcpListener::bind(settings.listen)
            .await
            .with_context(|| format!("binding control API to {}", settings.listen))?;
        let mut rx = shutdown_rx.clone();
        let shutdown = async move {
            let _ = rx.wait_for(|stop| *stop).await;
        };
        Some(tokio::spawn(crate::api::serve(listener, control, shutdown)))
    };

    let result = orchestrator.into_runtime().run().await;

    // The loop may have ended on its own (--once); stop the server too.
    let _ = shutdown_tx.send(true);
    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => debug!("control API stopped"),
            Ok(Err(err)) => warn!(error = %err, "control API exited with an error"),
            Err(err) => warn!(error = %err, "control API task failed"),
        }
    }

    result?;
    Ok(())
}

/// Print stages in topological order with their dependencies and triggers.
fn print_dry_run(cfg: &ConfigFile) {
    let s = &cfg.settings;
    println!("stagedag dry-run");
    println!("  config.tick_interval = {:?}", s.tick_interval);
    println!("  config.history_capacity = {}", s.history_capacity);
    println!("  config.listen = {}", s.listen);
    if let Some(path) = &s.state_file {
        println!("  config.state_file = {}", path.display());
    }
    println!();

    println!("stages ({}), in topological order:", cfg.graph.len());
    for stage in cfg.graph.stages() {
        println!("  - {}", stage.id);
        if let Some(cmd) = &stage.cmd {
            println!("      cmd: {cmd}");
        }
        if !stage.depends_on.is_empty() {
            println!("      depends_on: {:?}", stage.depends_on);
        }
        for trigger in &stage.triggers {
            println!("      trigger: {trigger}");
        }
        println!("      cooldown: {:?}", stage.cooldown);
        println!("      timeout: {:?}", stage.timeout);
        if let Some(max) = stage.max_retries {
            println!("      max_retries: {max}");
        }
    }

    debug!("dry-run complete (no execution)");
}
