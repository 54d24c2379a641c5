//! `twinlink` – process harness for the digital-twin update channel.
//!
//! 1. Loads `twinlink.toml` (all fields optional) and initialises logging.
//! 2. Builds the demo twin scene and discovers its part hierarchy.
//! 3. Runs the update channel against the configured relay until Ctrl-C or
//!    until the reconnect budget is exhausted.

mod config;
mod telemetry;

use std::sync::Arc;

use colored::Colorize;
use tracing::{error, info};

use twinlink_channel::{ChannelConfig, UpdateChannel};
use twinlink_engine::{TwinSession, refresh_shared};
use twinlink_scene::{PartFilter, SceneBackend, SimScene};
use twinlink_types::TwinError;

#[tokio::main]
async fn main() {
    telemetry::init_tracing();
    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => {
            println!("  No {} found; using defaults.", "twinlink.toml".bold());
            config::TwinConfig::default()
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::TwinConfig::default()
        }
    };
    println!("  Relay: {}", cfg.relay_url.bold());

    // Demo twin: a chain of parts standing in for the real scene.
    let (scene, _ids) = SimScene::demo_chain(cfg.demo_parts, 0.5);
    let backend: Arc<dyn SceneBackend> = Arc::new(scene);
    let session = TwinSession::shared(backend, PartFilter::new(&cfg.part_prefix));

    {
        let mut s = session.lock().await;
        s.on_selection_changed(Box::new(|name, origin| {
            info!(entity = name.unwrap_or("-"), ?origin, "selection changed");
        }));
    }

    refresh_shared(&session).await;
    {
        let s = session.lock().await;
        let snapshot = s.registry_snapshot();
        println!("  Discovered {} part(s):", snapshot.len().to_string().bold());
        for entry in &snapshot {
            println!("    • {}", entry.name);
        }
    }

    let mut channel_config = ChannelConfig::new(cfg.relay_url.clone());
    channel_config.kind = cfg.wire_kind;
    channel_config.mode = cfg.delta_mode;
    channel_config.pending_capacity = cfg.pending_capacity;
    let channel = Arc::new(UpdateChannel::new(channel_config, Arc::clone(&session)));

    let mut runner = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move { channel.run().await })
    };

    tokio::select! {
        result = &mut runner => {
            match result {
                Ok(Err(TwinError::ReconnectExhausted { attempts })) => {
                    error!(attempts, "relay unreachable; channel abandoned");
                    println!();
                    println!(
                        "{}",
                        "✗ Relay unreachable – update channel abandoned. Check the relay and restart."
                            .red()
                            .bold()
                    );
                    std::process::exit(1);
                }
                Ok(Err(e)) => error!(error = %e, "update channel failed"),
                Ok(Ok(())) => info!("update channel stopped"),
                Err(e) => error!(error = %e, "update channel task panicked"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("{}", "⚠  Ctrl-C received – stopping the update channel …".yellow().bold());
            channel.shutdown();
            let _ = runner.await;
            let health = channel.health();
            if let Some(at) = health.last_message_at {
                println!("  Last update received at {}", at.to_rfc3339().dimmed());
            }
            println!("{}", "  ✓ Update channel stopped.".green());
        }
    }
}

fn print_banner() {
    println!();
    println!("  {}", "twinlink".cyan().bold());
    println!("  {}", "kinematic digital-twin update channel".dimmed());
    println!();
}
