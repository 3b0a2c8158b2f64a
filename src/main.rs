use std::env;
use std::path::PathBuf;
use live_stream_publisher::app::PublisherApp;
use live_stream_publisher::config::AppConfig;
use live_stream_publisher::types::SessionCredentials;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Live Stream Publisher v0.1.0");

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let mut app = match flag_value(&args, "--config") {
        Some(path) => {
            let config_path = PathBuf::from(path);
            println!("Loading configuration from: {:?}", config_path);
            PublisherApp::with_config_file(config_path).await?
        }
        None => {
            println!("Starting with default configuration");
            PublisherApp::new().await?
        }
    };

    print_config_summary(app.config());

    if args.iter().any(|a| a == "--list-devices") {
        let inventory = app.list_devices().await;
        println!("\n--- Devices ---");
        for camera in &inventory.cameras {
            println!("camera     {} [{}]", camera.device_id, camera.label);
        }
        for mic in &inventory.microphones {
            println!("microphone {} [{}]", mic.device_id, mic.label);
        }
        if let Some(warning) = &inventory.warning {
            println!("warning: {}", warning);
        }
        return Ok(());
    }

    let credentials = SessionCredentials {
        session_id: flag_value(&args, "--session")
            .unwrap_or_else(|| "dev-session".to_string()),
        auth_token: flag_value(&args, "--token").unwrap_or_else(|| "dev-token".to_string()),
    };

    println!("\nPublishing session '{}'.", credentials.session_id);
    println!("Press Ctrl+C to stop.");

    if let Err(e) = app.run(credentials).await {
        eprintln!("Application error: {}", e);
        app.shutdown().await;
        return Err(e.into());
    }

    println!("Application shutdown complete.");
    Ok(())
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn print_help() {
    println!("Live Stream Publisher - capture, encode and publish live media");
    println!();
    println!("USAGE:");
    println!("    live-publisher [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <PATH>     Load configuration from specified file");
    println!("    --session <ID>      Session identifier to publish under");
    println!("    --token <TOKEN>     Auth token for the ingest endpoint");
    println!("    --list-devices      Enumerate capture devices and exit");
    println!("    --help, -h          Show this help message");
    println!();
    println!("EXAMPLES:");
    println!("    live-publisher --list-devices");
    println!("    live-publisher --config ./publisher.toml --session demo --token secret");
}

fn print_config_summary(config: &AppConfig) {
    println!("\n--- Configuration Summary ---");
    match &config.ingest.override_base {
        Some(base) => println!("Ingest: {} (override)", base),
        None => println!(
            "Ingest: {}:{} (secure: {})",
            config.ingest.host,
            config
                .ingest
                .port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "default".to_string()),
            config.ingest.secure
        ),
    }
    println!("Chunk interval: {:?}", config.publish.chunk_interval);
    println!("Max reconnect attempts: {}", config.publish.max_retries);
    println!("Dasher base: {}", config.playback.dasher_base);
    println!("Log Level: {}", config.logging.level);
}
