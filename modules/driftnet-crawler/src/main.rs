use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use driftnet_common::{Config, RuntimeProfile};
use driftnet_crawler::{
    CrawlWorker, HrefLinkExtractor, ProxyGateway, TieredFetcher, WorkerConfig,
};
use driftnet_ingest::{
    DocumentPipeline, ExtractorRegistry, HttpVectorIndex, OcrServiceRecognizer, PipelineConfig,
    RemoteOcrStrategy,
};
use driftnet_store::{
    PostgresDocumentStore, PostgresObjectStore, PostgresQueue, PostgresTaskStore, VerifiedStore,
};

#[derive(Parser)]
#[command(about = "Crawl worker: consumes crawl tasks and ingests documents")]
struct Args {
    /// Process at most one poll round and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("driftnet=info".parse()?))
        .init();

    let args = Args::parse();

    info!("Driftnet crawl worker starting...");

    let config = Config::from_env();
    config.log_redacted();
    let profile = RuntimeProfile::detect();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.metadata_store_uri)
        .await?;
    driftnet_store::migrate(&pool).await?;

    // Persistence adapters.
    let tasks = Arc::new(PostgresTaskStore::new(pool.clone()));
    let documents = Arc::new(PostgresDocumentStore::new(pool.clone()));
    let queue = Arc::new(PostgresQueue::new(pool.clone(), &config.queue_name));
    let objects = Arc::new(VerifiedStore::new(
        Arc::new(PostgresObjectStore::new(
            pool.clone(),
            &config.object_store_bucket,
        )),
        profile,
    ));

    // Vector backend.
    let vectors = Arc::new(HttpVectorIndex::new(vector_client::VectorClient::new(
        &config.vector_store_url,
        &config.vector_store_api_key,
    )));

    // OCR is optional; without it PDFs rely on embedded-text extraction.
    let ocr = match (&config.ocr_service_url, &config.ocr_service_api_key) {
        (Some(url), Some(key)) => Some(Arc::new(RemoteOcrStrategy::new(
            Arc::new(OcrServiceRecognizer::new(ocr_client::OcrClient::new(url, key))),
            objects.clone(),
            &config.object_store_bucket,
        ))),
        _ => {
            info!("OCR service not configured; remote OCR extraction disabled");
            None
        }
    };

    let pipeline = Arc::new(DocumentPipeline::new(
        objects.clone(),
        documents.clone(),
        vectors.clone(),
        ExtractorRegistry::standard(ocr),
        PipelineConfig {
            default_store_name: config.vector_store_default_name.clone(),
            max_body_bytes: config.fetcher_max_body_bytes,
            allowed_extensions: config.pipeline_allowed_extensions.clone(),
        },
    ));

    let gateway = match (&config.proxy_gateway_url, &config.proxy_gateway_api_key) {
        (Some(url), Some(key)) => Some(ProxyGateway {
            base_url: url.clone(),
            api_key: key.clone(),
        }),
        _ => {
            info!("Proxy gateway not configured; fetches stay at the direct tier");
            None
        }
    };
    let fetcher = Arc::new(TieredFetcher::new(
        gateway,
        &config.fetcher_default_country_code,
        config.fetcher_max_body_bytes,
    ));

    let worker = CrawlWorker::new(
        queue,
        tasks,
        pipeline,
        fetcher,
        Arc::new(HrefLinkExtractor),
        WorkerConfig::new(
            config.worker_batch_size,
            config.worker_wait_seconds,
            config.pipeline_allowed_extensions.clone(),
        ),
    );

    if args.once {
        let handled = worker.run_once().await?;
        info!(handled, "Single poll round complete");
        return Ok(());
    }

    worker.run().await?;
    Ok(())
}
