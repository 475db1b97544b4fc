//! Download a model from the Hugging Face Hub into a local store.
//!
//! ```text
//! cargo run --example fetch_model -- <repo_id> [backend] [models_dir] [quantization]
//! RUST_LOG=hubforge_core=debug cargo run --example fetch_model -- TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF gguf
//! ```

use futures::StreamExt;
use hubforge_core::storage::ModelFileManager;
use hubforge_core::{
    Backend, BackendDetector, CoordinatorConfig, DownloadCoordinator, DownloadEvent,
    DownloadRequest, HttpRepositoryClient, RepositoryClient, Result,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hubforge_core=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let repo_id = args
        .next()
        .unwrap_or_else(|| "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF".to_string());
    let backend = args.next();
    let models_dir = args.next().unwrap_or_else(|| "./example-models".to_string());
    let quantization = args.next();

    let client = Arc::new(HttpRepositoryClient::new()?);

    let backend: Backend = match backend {
        Some(name) => name.parse()?,
        None => {
            let files = client.list_files(&repo_id, "main").await?;
            let detected = BackendDetector::new().detect(&files);
            println!("Detected backends: {:?}", detected);
            match detected.first() {
                Some(backend) => *backend,
                None => {
                    println!("{} has no downloadable model files", repo_id);
                    return Ok(());
                }
            }
        }
    };

    let files = Arc::new(ModelFileManager::new(&models_dir)?);
    let coordinator = DownloadCoordinator::new(client, files, CoordinatorConfig::default());

    let mut request = DownloadRequest::new(&repo_id, backend);
    if let Some(level) = quantization {
        request = request.with_quantization(level);
    }

    println!("Downloading {} for {} into {}", repo_id, backend, models_dir);
    let mut stream = coordinator.download_with(request).await?;

    // Cancel cleanly on Ctrl+C
    let cancel_handle = coordinator.clone();
    let cancel_repo = repo_id.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_handle.cancel(&cancel_repo).await;
        }
    });

    while let Some(event) = stream.next().await {
        match event? {
            DownloadEvent::Progress(p) => {
                let percent = if p.total_bytes > 0 {
                    p.bytes_downloaded as f64 / p.total_bytes as f64 * 100.0
                } else {
                    0.0
                };
                println!(
                    "  {:>5.1}%  {}/{} files  {}",
                    percent,
                    p.files_completed,
                    p.total_files,
                    p.current_file.unwrap_or_default()
                );
            }
            DownloadEvent::Completed(record) => {
                println!("Finalized {} ({})", record.name, record.id);
                println!("  path: {}", record.storage_path.display());
                println!("  size: {} bytes", record.total_size_bytes);
            }
        }
    }
    println!("Session ended: {}", stream.status());

    for record in coordinator.list_downloaded_models().await? {
        println!("  - {} [{}] {} bytes", record.name, record.backend, record.total_size_bytes);
    }
    Ok(())
}
