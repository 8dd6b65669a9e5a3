// Crawl side of the ingestion platform: the tiered fetcher, link
// extraction, the queue-driven worker, and the API facade the HTTP layer
// consumes.

pub mod fetcher;
pub mod links;
pub mod service;
pub mod worker;

pub use fetcher::{
    ContentChecker, FetchRequest, FetchResponse, Fetcher, ProxyGateway, ProxyTier, TieredFetcher,
};
pub use links::{HrefLinkExtractor, LinkExtractor, LinkPartition};
pub use service::{CrawlResults, IngestionService};
pub use worker::{CrawlWorker, WorkerConfig};
