use anyhow::{Context, Result};
use clap::Parser;
use localrec::adapter::{AdapterContext, AdapterRegistry};
use localrec::{
    create_router, AppState, Conference, Config, Coordinator, CoordinatorEvent,
    DirectoryUploadSink, MemoryConference, NatsSignaling, StatsPoller, SyntheticDevices,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Local recording participant with an HTTP control API
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file, without extension
    #[arg(short, long, default_value = "config/localrec")]
    config: String,

    /// Participant id (random if omitted)
    #[arg(long)]
    user_id: Option<String>,

    /// Name shown to other participants
    #[arg(long)]
    display_name: Option<String>,

    /// Join with moderator rights
    #[arg(long)]
    moderator: bool,

    /// Use an in-process conference instead of NATS
    #[arg(long)]
    local: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("localrec v{}", env!("CARGO_PKG_VERSION"));

    let user_id = args
        .user_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let display_name = args.display_name.unwrap_or_else(|| user_id.clone());

    let mut nats = None;
    let (conference, commands) = if args.local {
        info!("Using in-process conference");
        let (endpoint, commands) =
            MemoryConference::new().join(&user_id, &display_name, args.moderator);
        let conference: Arc<dyn Conference> = Arc::new(endpoint);
        (conference, commands)
    } else {
        let (signaling, commands) = NatsSignaling::connect(
            &cfg.signaling.nats_url,
            &cfg.signaling.conference,
            &user_id,
            &display_name,
            args.moderator,
        )
        .await?;
        let signaling = Arc::new(signaling);
        nats = Some(Arc::clone(&signaling));
        let conference: Arc<dyn Conference> = signaling;
        (conference, commands)
    };

    info!(
        "Joined conference {} as {} (moderator={})",
        cfg.signaling.conference, user_id, args.moderator
    );

    // No platform capture backend is linked in; inputs are tone generators
    let devices = Arc::new(SyntheticDevices::new());
    let adapters = AdapterRegistry::new(AdapterContext {
        devices,
        audio: cfg.audio(),
    });

    let upload_dir = cfg.upload_directory()?;
    info!("Recordings are stored in {}", upload_dir.display());
    let upload = Arc::new(DirectoryUploadSink::new(
        upload_dir,
        &cfg.upload.public_base_url,
    ));

    let coordinator = Coordinator::new(conference, adapters, upload, cfg.coordinator_options()?);
    let (handle, coordinator_task) = coordinator.spawn(commands);

    // Surface notifications the way a UI would
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                CoordinatorEvent::Notify { key, params } => info!("[notify] {} {:?}", key, params),
                CoordinatorEvent::Warning { key, message } => warn!("[warning] {}: {}", key, message),
                CoordinatorEvent::Uploaded { session_token, url } => {
                    info!("Session {} available at {}", session_token, url)
                }
                other => debug!("{:?}", other),
            }
        }
    });

    let stats = StatsPoller::spawn(handle.clone(), cfg.stats_interval());
    let mut stats_rx = stats.subscribe();
    tokio::spawn(async move {
        while stats_rx.changed().await.is_ok() {
            let snapshot = stats_rx.borrow().clone();
            for row in snapshot.values() {
                debug!("stats {} ({}): {:?}", row.display_name, row.id, row.recording_stats);
            }
        }
    });

    let app = create_router(AppState::new(handle.clone()));
    let addr = format!("{}:{}", cfg.http.bind, cfg.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    drop(stats);
    if let Err(e) = handle.shutdown().await {
        warn!("Coordinator already stopped: {}", e);
    }
    let _ = coordinator_task.await;

    if let Some(nats) = nats {
        nats.leave().await?;
    }

    Ok(())
}
