use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use waav_realtime_console::console::{ConnectionState, Snapshot, TurnDetectionMode};
use waav_realtime_console::core::audio::{AudioBackend, MemoryAudioBackend, SAMPLE_RATE};
use waav_realtime_console::core::realtime::{ItemRole, ItemStatus, OpenAIRealtime};
use waav_realtime_console::{ConsoleConfig, ConsoleHandle, ConsoleManager, ToolRegistry};

/// Output frames rendered per pacing tick in text mode.
const PACING_INTERVAL: Duration = Duration::from_millis(100);

/// WaaV Realtime Console - full-duplex voice session in the terminal
#[derive(Parser, Debug)]
#[command(name = "waav-console")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run without audio devices; type messages instead
    #[arg(long)]
    text: bool,

    /// Start with server-side voice activity detection
    #[arg(long)]
    vad: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they do not interleave with the transcript
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        ConsoleConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ConsoleConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    if !config.has_api_key() {
        anyhow::bail!("OPENAI_API_KEY is not set (environment, .env or openai.api_key in YAML)");
    }

    let mut options = config.console_options();
    if cli.vad {
        options.mode = TurnDetectionMode::ServerVad;
    }
    if cli.text && options.mode == TurnDetectionMode::ServerVad {
        warn!("Server VAD has no microphone to listen to in text mode");
    }

    let transport = OpenAIRealtime::new(config.realtime_config())
        .map_err(|e| anyhow!("Failed to create realtime client: {}", e))?;
    let memory = config
        .memory_persistence()
        .map_err(|e| anyhow!("Failed to set up memory persistence: {}", e))?;
    let backend = audio_backend(cli.text)?;

    info!(
        endpoint = config.realtime_endpoint(),
        model = %config.model,
        mode = %options.mode,
        "Starting console"
    );

    let console = ConsoleManager::spawn(
        Box::new(transport),
        backend,
        Arc::new(ToolRegistry::new()),
        memory,
        options,
    )?;
    console.connect().await?;

    let printer = tokio::spawn(print_transcript(console.clone()));
    let result = read_commands(&console).await;

    console.shutdown().await?;
    printer.abort();
    result
}

fn audio_backend(text_only: bool) -> anyhow::Result<Arc<dyn AudioBackend>> {
    #[cfg(feature = "cpal-audio")]
    if !text_only {
        return Ok(Arc::new(waav_realtime_console::core::audio::CpalAudioBackend::new()));
    }

    #[cfg(not(feature = "cpal-audio"))]
    if !text_only {
        warn!("Built without the cpal-audio feature, running in text mode");
    }

    let backend = Arc::new(MemoryAudioBackend::new());
    let output = backend.output_handle();
    let frames_per_tick = (SAMPLE_RATE as u128 * PACING_INTERVAL.as_millis() / 1000) as usize;

    // Drain playback at real-time speed so interruption offsets stay meaningful
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PACING_INTERVAL);
        loop {
            ticker.tick().await;
            let _ = output.pull(frames_per_tick);
        }
    });

    Ok(backend)
}

/// Handle stdin lines until `/quit` or end of input.
async fn read_commands(console: &ConsoleHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut talking = false;

    println!("Type a message, or /ptt /vad /manual /delete <id> /quit");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let result = match line.split_once(' ').unwrap_or((line, "")) {
            ("", _) => continue,
            ("/quit", _) => break,
            ("/vad", _) => {
                talking = false;
                console
                    .set_turn_detection_mode(TurnDetectionMode::ServerVad)
                    .await
            }
            ("/manual", _) => {
                console
                    .set_turn_detection_mode(TurnDetectionMode::Manual)
                    .await
            }
            ("/ptt", _) => {
                talking = !talking;
                if talking {
                    println!("(recording, /ptt again to send)");
                    console.start_recording().await
                } else {
                    console.stop_recording().await
                }
            }
            ("/delete", id) if !id.trim().is_empty() => console.delete_item(id.trim()).await,
            ("/delete", _) => {
                println!("usage: /delete <item id>");
                continue;
            }
            _ => console.send_text(line).await,
        };

        if let Err(e) = result {
            warn!("{}", e);
        }
    }

    Ok(())
}

/// Print completed items as they show up in snapshots.
async fn print_transcript(console: ConsoleHandle) {
    let mut snapshots = console.subscribe();
    let mut printed = HashSet::new();
    let mut last_state = ConnectionState::Disconnected;

    while snapshots.changed().await.is_ok() {
        let snapshot: Snapshot = snapshots.borrow_and_update().clone();

        if snapshot.state != last_state {
            println!("[{}]", snapshot.state);
            last_state = snapshot.state;
        }

        for item in &snapshot.items {
            if item.status != ItemStatus::Completed || printed.contains(&item.id) {
                continue;
            }
            printed.insert(item.id.clone());

            let body = if let Some(tool) = &item.tool {
                format!("{}({})", tool.name, tool.arguments)
            } else if let Some(output) = &item.output {
                format!("-> {output}")
            } else if !item.transcript.is_empty() {
                item.transcript.clone()
            } else {
                item.text.clone()
            };
            let role = item
                .role
                .map(|role| role.to_string())
                .unwrap_or_else(|| "tool".to_string());
            if role == ItemRole::User.to_string() && body.is_empty() {
                continue;
            }
            println!("{} {}: {}", item.id, role, body);
        }
    }
}
