//! clusterctl - Entry Point
//!
//! Management console provisioning cache clusters, log shipping and
//! directory replication across a fleet of servers.

use std::collections::HashMap;
use std::env;

use clusterctl::app::options::AppOptions;
use clusterctl::app::run::run;
use clusterctl::app::state::AppState;
use clusterctl::errors::ConsoleError;
use clusterctl::filesys::file::File;
use clusterctl::logs::{init_logging, LogOptions};
use clusterctl::storage::layout::StorageLayout;
use clusterctl::storage::settings::Settings;
use clusterctl::storage::store::Records;
use clusterctl::utils::version_info;

use colored::Colorize;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };
    let settings_file = match cli_args.get("config") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };

    // Write defaults and exit
    if cli_args.contains_key("init") {
        if let Err(e) = init_layout(&layout, &settings_file).await {
            eprintln!("{} {}", "Initialization failed:".red(), e);
            std::process::exit(1);
        }
        println!("{} {}", "Initialized".green(), layout.base_dir.display());
        return;
    }

    // Retrieve the settings file
    let settings = match load_settings(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        file_output: settings.log_to_file,
        log_dir: layout.logs_dir().path().to_path_buf(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(layout, &settings);

    // Print the cache fleet status and exit
    if cli_args.contains_key("status") {
        if let Err(e) = print_status(&options).await {
            error!("Failed to read cache status: {e}");
            std::process::exit(1);
        }
        return;
    }

    info!("Running clusterctl with options: {:?}", options);
    let result = run(options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the console: {e}");
        std::process::exit(1);
    }
}

async fn load_settings(file: &File) -> Result<Settings, ConsoleError> {
    match file.read_string_opt().await? {
        Some(contents) if !contents.trim().is_empty() => Ok(serde_json::from_str(&contents)?),
        _ => Ok(Settings::default()),
    }
}

async fn init_layout(layout: &StorageLayout, settings_file: &File) -> Result<(), ConsoleError> {
    layout.setup().await?;
    if !settings_file.exists().await {
        settings_file.write_json_atomic(&Settings::default()).await?;
    }
    let store_file = layout.store_file();
    if !store_file.exists().await {
        store_file.write_json_atomic(&Records::default()).await?;
        store_file.set_permissions_600().await?;
    }
    Ok(())
}

async fn print_status(options: &AppOptions) -> Result<(), ConsoleError> {
    let state = AppState::init(options).await?;
    let status = state.orchestrator.cache_status().await?;

    let mark = |up: Option<&bool>| match up {
        Some(true) => "up".green(),
        Some(false) => "down".red(),
        None => "-".normal(),
    };

    println!("{:<18} {:<8} {:<8}", "HOST".bold(), "REDIS".bold(), "STUNNEL".bold());
    for ip in status.stunnel.keys() {
        println!(
            "{:<18} {:<8} {:<8}",
            ip,
            mark(status.redis.get(ip)),
            mark(status.stunnel.get(ip))
        );
    }
    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    error!("Unable to install signal handlers, waiting for Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
