use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use duplex_recorder::config::DEFAULT_CONFIG_PATH;
use duplex_recorder::{
    create_router, export_wav, import_wav, AppState, AudioBackendFactory, AudioSession,
    BackendKind, BackingStore, Config, SessionConfig, SessionEvent,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Record from the microphone into a raw PCM file and play it back
#[derive(Parser, Debug)]
#[command(name = "duplex-recorder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Audio backend, overriding the configuration
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record until Ctrl-C or the time limit
    Record {
        /// Stop after this many seconds
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Play the last recording to the end or until Ctrl-C
    Play,
    /// Write the last recording to a WAV file
    Export {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Replace the recording with the samples of a WAV file
    Import {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Serve the HTTP control API
    Serve,
}

/// Initialize tracing from the verbosity flags; `RUST_LOG` wins when set
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives = if cli.quiet {
            "error"
        } else {
            match cli.verbose {
                0 => "warn",
                1 => "warn,duplex_recorder=info",
                2 => "info,duplex_recorder=debug,tower_http=debug",
                _ => "trace",
            }
        };
        EnvFilter::new(directives)
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let cfg = Config::load(&cli.config)?;
    let session_config = cfg.audio.session_config();
    let backend_kind = cli.backend.unwrap_or(cfg.audio.backend);

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Record { seconds } => {
            let session = open_session(backend_kind, session_config)?;
            record(&session, seconds).await
        }
        Command::Play => {
            let session = open_session(backend_kind, session_config)?;
            play(&session).await
        }
        Command::Serve => {
            let session = open_session(backend_kind, session_config)?;
            serve(Arc::new(session), cfg.http_addr()).await
        }
        Command::Export { output } => {
            let store = BackingStore::new(session_config.store_path, session_config.format);
            let frames = export_wav(&store, &output)?;
            println!("Exported {} frames to {}", frames, output.display());
            Ok(())
        }
        Command::Import { input } => {
            let store = BackingStore::new(session_config.store_path, session_config.format);
            let frames = import_wav(&store, &input)?;
            println!("Imported {} frames into {}", frames, store.path().display());
            Ok(())
        }
    }
}

fn open_session(kind: BackendKind, config: SessionConfig) -> Result<AudioSession> {
    if kind.is_synthetic() {
        warn!(
            "Using the simulated audio backend: recordings hold a test tone, not the microphone \
             (pass --backend cpal or set audio.backend)"
        );
    }
    let backend = AudioBackendFactory::create(kind).context("Failed to create audio backend")?;
    Ok(AudioSession::new(config, backend))
}

async fn record(session: &AudioSession, seconds: Option<u64>) -> Result<()> {
    let mut events = session.subscribe();
    session.start_recording().await?;
    println!(
        "Recording to {} (Ctrl-C to stop)",
        session.store().path().display()
    );

    let limit = async {
        match seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(limit);

    let mut timer = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = timer.tick() => println!("{} sec", session.elapsed().as_secs()),
            _ = &mut limit => break,
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                if let Ok(SessionEvent::WorkerFailed { error, .. }) = event {
                    return Err(error).context("Recording failed");
                }
            }
        }
    }

    let elapsed = session.stop_recording().await?;
    println!(
        "Recorded {:.1}s ({} frames)",
        elapsed.as_secs_f64(),
        session.store().frame_count()
    );
    Ok(())
}

async fn play(session: &AudioSession) -> Result<()> {
    let mut events = session.subscribe();
    session.start_playback().await?;
    println!("Playing {} (Ctrl-C to stop)", session.store().path().display());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::PlaybackFinished { frames, .. }) => {
                    println!("Playback finished ({} frames)", frames);
                    break;
                }
                Ok(SessionEvent::WorkerFailed { error, .. }) => {
                    return Err(error).context("Playback failed");
                }
                Err(RecvError::Closed) => break,
                _ => {}
            },
            _ = tokio::signal::ctrl_c() => {
                session.stop_playback().await?;
                println!("Playback stopped after {:.1}s", session.elapsed().as_secs_f64());
                break;
            }
        }
    }

    Ok(())
}

async fn serve(session: Arc<AudioSession>, addr: String) -> Result<()> {
    let app = create_router(AppState::new(Arc::clone(&session)));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP control API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await
        .context("HTTP server failed")?;

    info!("Shutting down, stopping any active recording or playback");
    session.shutdown().await?;
    Ok(())
}
