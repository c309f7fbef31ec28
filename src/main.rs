use anyhow::{Context, Result};
use clap::Parser;
use media_vault::{
    client::{ApiClient, ByteSource, FileSource, HttpTransport, UploadCoordinator},
    config::{AppConfig, Args, Command, ServeArgs, UploadArgs},
    db,
    models::upload::{CreateUploadRequest, PartStatus},
    routes::routes::app,
    services::{
        auth::AdminKeyGate, metadata_service::MetadataService,
        multipart_service::MultipartService,
    },
    state::AppState,
};
use std::{io::ErrorKind, sync::Arc};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Some(Command::Upload(upload)) => run_upload(upload).await,
        Some(Command::Serve(serve)) => run_server(serve).await,
        None => run_server(ServeArgs::default()).await,
    }
}

async fn run_server(args: ServeArgs) -> Result<()> {
    let cfg = AppConfig::from_env_and_args(&args)?;
    tracing::info!("Starting media-vault with config: {:?}", cfg);

    if cfg.admin_key.is_none() {
        tracing::warn!("VAULT_ADMIN_KEY is not set; every admin request will be refused");
    }
    if let Err(missing) = cfg.storage.require() {
        tracing::warn!("{}; upload endpoints will fail until it is set", missing);
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(
        db::connect(&cfg.database_url)
            .await
            .with_context(|| format!("opening database {}", cfg.database_url))?,
    );

    // --- Handle migration mode ---
    if args.migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    let state = AppState::new(
        MultipartService::new(cfg.storage.clone()),
        MetadataService::new(db.clone()),
        Arc::new(AdminKeyGate::new(cfg.admin_key.clone())),
    );

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app(state)).await?;

    Ok(())
}

async fn run_upload(args: UploadArgs) -> Result<()> {
    let admin_key = args
        .admin_key()
        .context("an admin key is required (--admin-key or VAULT_ADMIN_KEY)")?;
    let source = FileSource::open(&args.file)
        .await
        .with_context(|| format!("opening {}", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.mp4".into());

    let http = reqwest::Client::new();
    let api = ApiClient::new(http.clone(), &args.server_url(), admin_key);
    let mut coordinator =
        UploadCoordinator::new(HttpTransport::new(http)).with_concurrency(args.concurrency);

    let mut updates = coordinator.subscribe();
    let reporter = tokio::spawn(async move {
        let mut last_percent = 0u64;
        while let Some(update) = updates.recv().await {
            let percent = (update.overall * 100.0).floor() as u64;
            match update.part.status {
                PartStatus::Done => tracing::info!(
                    part = update.part.part_number,
                    overall = percent,
                    "part uploaded"
                ),
                PartStatus::Error => tracing::warn!(
                    part = update.part.part_number,
                    error = ?update.part.error,
                    "part failed"
                ),
                _ if percent > last_percent => tracing::debug!(overall = percent, "progress"),
                _ => {}
            }
            last_percent = last_percent.max(percent);
        }
    });

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing in-flight parts");
            cancel.cancel();
        }
    });

    let request = CreateUploadRequest {
        title: args.title.clone(),
        file_name,
        size_bytes: source.size(),
        content_type: args.content_type.clone(),
    };
    let result = coordinator
        .run(&api, &request, &source, args.retry_rounds)
        .await;
    drop(coordinator);
    join_reporter(reporter).await;

    let created = result.context("upload failed")?;
    tracing::info!(
        media_id = %created.media_id,
        slug = %created.slug,
        key = %created.session.object_key,
        "upload finished"
    );
    Ok(())
}

/// Wait for the progress reporter; a panicked or aborted task is logged.
async fn join_reporter(reporter: JoinHandle<()>) -> bool {
    match reporter.await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(error = %err, "progress reporter stopped abnormally");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reporter_failure_is_reported() {
        assert!(join_reporter(tokio::spawn(async {})).await);

        let panicked: JoinHandle<()> = tokio::spawn(async { panic!("reporter crashed") });
        assert!(!join_reporter(panicked).await);
    }
}
