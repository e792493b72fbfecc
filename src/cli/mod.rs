//! Command-line interface

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::channel::ChannelClient;
use crate::clipboard::ArboardClipboard;
use crate::config::ConfigStore;
use crate::engine::SyncEngine;
use crate::manager::{SyncManager, SyncTransport};
use crate::state::{SyncBus, SyncShared};
use crate::store::HistoryStore;
use crate::transfer::HttpFileTransfer;

#[derive(Parser)]
#[command(name = "cliprelay")]
#[command(about = "Multi-device clipboard synchronization client")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the sync client")]
    Start,

    #[command(about = "Log in to the relay server")]
    Login {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        password: String,
    },

    #[command(about = "Log out and disable sync")]
    Logout,

    #[command(about = "Show sync status")]
    Status,

    #[command(about = "Run one reconciliation pass and exit")]
    Sync,

    #[command(about = "Show clipboard history")]
    History {
        #[arg(short, long, default_value = "10")]
        limit: u32,

        /// Fetch the server-side history instead of the local store
        #[arg(long)]
        remote: bool,
    },

    #[command(about = "Enable synchronization")]
    Enable,

    #[command(about = "Disable synchronization")]
    Disable,
}

pub struct CliHandler {
    config: Arc<ConfigStore>,
    bus: SyncBus,
}

impl CliHandler {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            // Route loads and saves through the given file
            std::env::set_var("CLIPRELAY_CONFIG", path);
        }

        let bus = SyncBus::new();
        let config = ConfigStore::load(bus.clone()).context("failed to load configuration")?;

        Ok(Self { config, bus })
    }

    pub async fn handle_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Start => self.start().await,
            Commands::Login { username, password } => self.login(&username, &password).await,
            Commands::Logout => self.logout(),
            Commands::Status => self.status().await,
            Commands::Sync => self.sync_once().await,
            Commands::History { limit, remote } => self.history(limit, remote).await,
            Commands::Enable => {
                self.config.set_enabled(true)?;
                println!("Sync enabled");
                Ok(())
            }
            Commands::Disable => {
                self.config.set_enabled(false)?;
                println!("Sync disabled");
                Ok(())
            }
        }
    }

    async fn login(&self, username: &str, password: &str) -> Result<()> {
        let api = ApiClient::new(self.config.clone());
        let token = api
            .login(username, password)
            .await
            .context("login failed")?;

        self.config.set_token(Some(token))?;
        let user = ApiClient::new(self.config.clone()).current_user().await?;
        println!("Logged in as {}", user.username);
        Ok(())
    }

    fn logout(&self) -> Result<()> {
        self.config.set_token(None)?;
        self.config.set_enabled(false)?;
        println!("Logged out");
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        let cfg = self.config.get();
        let store = HistoryStore::open(&cfg.history_db).await?;
        let pending = store.pending_count().await?;

        println!("Server:    {}", cfg.server_url);
        println!("Device:    {} ({})", cfg.device_name, cfg.device_id);
        println!(
            "Logged in: {}",
            if cfg.is_logged_in() { "yes" } else { "no" }
        );
        println!("Enabled:   {}", if cfg.enabled { "yes" } else { "no" });
        println!("Pending:   {} record(s) queued for upload", pending);
        Ok(())
    }

    async fn history(&self, limit: u32, remote: bool) -> Result<()> {
        if remote {
            return self.remote_history(limit).await;
        }

        let cfg = self.config.get();
        let store = HistoryStore::open(&cfg.history_db).await?;

        for record in store.recent(limit).await? {
            let preview: String = record.value.chars().take(60).collect();
            let marker = if record.synced { " " } else { "*" };
            println!(
                "{} [{}] {} {}",
                marker, record.kind, record.create_time, preview
            );
        }
        Ok(())
    }

    async fn remote_history(&self, limit: u32) -> Result<()> {
        let cfg = self.config.get();
        anyhow::ensure!(cfg.is_logged_in(), "not logged in; run `cliprelay login` first");
        self.config.resolve_device_name().await;

        let shared = SyncShared::new(self.bus.clone());
        let client = ChannelClient::new(self.config.clone(), shared.clone());
        let (manager, _events) = SyncManager::new(client, shared);
        manager.connect().await.context("failed to connect")?;

        for item in manager.fetch_history(limit).await? {
            let preview: String = item.record.value.chars().take(60).collect();
            println!(
                "  [{}] {} {}",
                item.record.kind, item.record.create_time, preview
            );
        }

        manager.disconnect(true);
        Ok(())
    }

    async fn sync_once(&self) -> Result<()> {
        let (engine, manager, events) = self.connected_stack().await?;
        let pump = tokio::spawn(engine.clone().run(events));

        engine.enable();
        engine.full_sync().await?;

        match manager.get_online_devices().await {
            Ok(devices) => println!("Online devices: {}", devices.len()),
            Err(e) => warn!("Failed to list online devices: {}", e),
        }

        // Give the background drain and watermark flush a moment
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        engine.disable().await;
        manager.disconnect(true);
        pump.abort();

        println!("Sync complete");
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let (engine, manager, events) = self.connected_stack().await?;
        tokio::spawn(engine.clone().run(events));

        engine.enable();
        if let Err(e) = engine.full_sync().await {
            warn!("Initial reconciliation failed: {}", e);
        }
        let watcher = engine.start_clipboard_watcher();

        info!("ClipRelay running; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        info!("Shutting down");

        watcher.abort();
        engine.disable().await;
        manager.disconnect(true);
        Ok(())
    }

    async fn connected_stack(
        &self,
    ) -> Result<(
        Arc<SyncEngine>,
        Arc<SyncManager>,
        tokio::sync::mpsc::UnboundedReceiver<crate::manager::RemoteEvent>,
    )> {
        let cfg = self.config.get();
        anyhow::ensure!(cfg.is_logged_in(), "not logged in; run `cliprelay login` first");

        self.config.resolve_device_name().await;

        let store = Arc::new(HistoryStore::open(&cfg.history_db).await?);
        let shared = SyncShared::new(self.bus.clone());
        let client = ChannelClient::new(self.config.clone(), shared.clone());
        let (manager, events) = SyncManager::new(client, shared.clone());

        let engine = SyncEngine::new(
            store,
            manager.clone(),
            Arc::new(HttpFileTransfer::new(self.config.clone())),
            Arc::new(ArboardClipboard::new()),
            shared,
            self.config.clone(),
            Arc::new(ApiClient::new(self.config.clone())),
        );

        manager.connect().await.context("failed to connect")?;
        Ok((engine, manager, events))
    }
}
