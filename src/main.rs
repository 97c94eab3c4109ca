// Copyright 2025 coScene
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

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use victron_ble_logger::config::{load_config_with_env, ConfigLoader, LoggingConfig};
use victron_ble_logger::keys::EncryptionKeyRegistry;
use victron_ble_logger::recorder::Recorder;
use victron_ble_logger::storage::{FilesystemBackend, StorageBackend};
use victron_ble_logger::transport::{AdvertisementSource, LineSource};

/// Victron BLE Logger - Decode Victron instant readout advertisements into rolling archives
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Encryption key file (overrides config file)
    #[arg(short, long)]
    keyfile: Option<PathBuf>,

    /// Raw log directory (overrides config file)
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Archive cache directory (overrides config file)
    #[arg(short = 'f', long)]
    cache: Option<PathBuf>,

    /// Verbosity 0..4 (warn, info, debug, trace, trace); overrides logging.level
    #[arg(short, long)]
    verbose: Option<u8>,

    /// Advertisement feed; stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,
}

fn init_tracing(logging: &LoggingConfig, verbose: Option<u8>) -> Result<()> {
    let log_level = match verbose {
        Some(0) => Level::WARN,
        Some(1) => Level::INFO,
        Some(2) => Level::DEBUG,
        Some(_) => Level::TRACE,
        None => match logging.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        },
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr);
    if logging.format == "compact" {
        tracing::subscriber::set_global_default(builder.compact().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration, then environment and CLI overrides
    let mut config = load_config_with_env(args.config.as_ref())?;
    if let Some(keyfile) = args.keyfile {
        config.keys.file = keyfile;
    }
    if let Some(log) = args.log {
        config.storage.log_directory = Some(log);
    }
    if let Some(cache) = args.cache {
        config.storage.cache_directory = Some(cache);
    }
    ConfigLoader::validate(&config)?;

    init_tracing(&config.logging, args.verbose)?;

    info!("Starting Victron BLE Logger");
    if let Some(path) = &args.config {
        info!("Loaded configuration from: {}", path.display());
    }

    // Keys are required; there is nothing to decode without them
    let keys = Arc::new(EncryptionKeyRegistry::new(&config.keys.file));
    keys.reload_if_changed()?;
    keys.require_keys()?;

    let storage: Arc<dyn StorageBackend> = Arc::new(FilesystemBackend::new(&config.storage));
    storage
        .initialize()
        .await
        .context("Failed to initialize storage")?;
    info!("Storage backend initialized: {}", storage.backend_type());

    let recorder = Recorder::new(config.recorder.clone(), keys, storage);
    let summary = recorder.restore().await?;
    info!("{:?}", summary);

    let mut source: Box<dyn AdvertisementSource> = match &args.input {
        Some(path) => Box::new(LineSource::open(path).await?),
        None => Box::new(LineSource::stdin()),
    };
    info!("Reading advertisements from {}", source.source_type());

    let mut flush_tick = interval(config.recorder.log_flush_interval());
    flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut key_tick = interval(config.recorder.key_reload_interval());
    key_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = source.next_event() => match event {
                Ok(Some(event)) => {
                    recorder.handle_event(event).await;
                }
                Ok(None) => {
                    info!("Advertisement source exhausted");
                    break;
                }
                Err(e) => {
                    error!("Advertisement source error: {:#}", e);
                    break;
                }
            },
            _ = flush_tick.tick() => {
                recorder.flush_logs().await;
                if let Err(e) = recorder.flush_caches().await {
                    warn!("Cache flush failed: {:#}", e);
                }
            }
            _ = key_tick.tick() => {
                if recorder.reload_keys() {
                    info!("Encryption keys reloaded");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    // Cleanup
    recorder.shutdown().await?;
    info!("Victron BLE Logger shut down successfully");

    Ok(())
}
