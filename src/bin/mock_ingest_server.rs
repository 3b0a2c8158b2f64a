use clap::{Arg, Command};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};

use live_stream_publisher::mock_ingest::MockIngestServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let matches = Command::new("Mock Ingest Server")
        .version("1.0")
        .about("Mock WebSocket ingest endpoint for testing live publishers")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Server listening port")
                .default_value("8080"),
        )
        .arg(
            Arg::new("host")
                .short('H')
                .long("host")
                .value_name("HOST")
                .help("Server listening host")
                .default_value("127.0.0.1"),
        )
        .arg(
            Arg::new("token")
                .short('t')
                .long("token")
                .value_name("TOKEN")
                .help("Require this auth token on every handshake"),
        )
        .get_matches();

    let port: u16 = matches
        .get_one::<String>("port")
        .unwrap()
        .parse()
        .expect("Invalid port number");
    let host = matches.get_one::<String>("host").unwrap();
    let token = matches.get_one::<String>("token").cloned();

    let server = MockIngestServer::bind(&format!("{}:{}", host, port), token).await?;
    info!("Ingest path: {}/ws/ingest/<session>/<publisher>", server.base_url());

    run_console(server).await?;
    Ok(())
}

async fn run_console(server: MockIngestServer) -> Result<(), Box<dyn std::error::Error>> {
    info!("Mock ingest server is running. Available commands:");
    info!("  stats - Show ingest counters");
    info!("  drop  - Sever all live publisher connections");
    info!("  quit  - Exit server");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "stats" => {
                let stats = server.stats();
                info!("Ingest statistics:");
                info!("  Connections accepted: {}", stats.connections);
                info!("  Handshakes rejected:  {}", stats.rejected_handshakes);
                info!("  Binary frames:        {}", stats.binary_frames);
                info!("  Binary bytes:         {}", stats.binary_bytes);
                info!("  Text frames:          {}", stats.text_frames);
            }
            "drop" => {
                server.drop_all();
                info!("Dropped all live publisher connections");
            }
            "quit" | "exit" => {
                info!("Shutting down server...");
                break;
            }
            "" => {}
            other => {
                info!("Unknown command: {}. Type 'quit' to exit.", other);
            }
        }
    }

    server.shutdown().await;
    Ok(())
}
