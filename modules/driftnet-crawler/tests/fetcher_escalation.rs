// Tier escalation against a local HTTP server: direct 403, standard-tier
// gateway 429, premium-tier gateway 200, and the host's tier is
// remembered for the next fetch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use driftnet_common::FetchPolicy;
use driftnet_crawler::{FetchRequest, Fetcher, ProxyGateway, ProxyTier, TieredFetcher};

const PAGE_BODY: &str = "<html><body><h1>Market data</h1>\
    <p>Enough body text to satisfy any minimum-content threshold.</p></body></html>";

#[derive(Default)]
struct ServerState {
    hits: Mutex<HashMap<String, usize>>,
}

impl ServerState {
    fn record(&self, label: &str) {
        *self
            .hits
            .lock()
            .expect("lock poisoned")
            .entry(label.to_string())
            .or_insert(0) += 1;
    }

    fn count(&self, label: &str) -> usize {
        self.hits
            .lock()
            .expect("lock poisoned")
            .get(label)
            .copied()
            .unwrap_or(0)
    }
}

/// Minimal HTTP/1.1 responder. `/blocked` plays a bot-blocking origin;
/// `/gateway` plays the proxy gateway, succeeding only with
/// `premium_proxy=true`.
async fn serve(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let state = state.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 16 * 1024];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            let target = request
                .lines()
                .next()
                .and_then(|line| line.split_whitespace().nth(1))
                .unwrap_or("/")
                .to_string();

            let (status_line, body) = if target.starts_with("/gateway") {
                if target.contains("premium_proxy=true") {
                    state.record("gateway_premium");
                    ("200 OK", PAGE_BODY)
                } else {
                    state.record("gateway_standard");
                    ("429 Too Many Requests", "slow down")
                }
            } else if target.starts_with("/blocked") {
                state.record("direct");
                ("403 Forbidden", "bots are not welcome")
            } else {
                ("404 Not Found", "nothing here")
            };

            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
    }
}

#[tokio::test]
async fn fetch_escalates_to_premium_and_remembers_the_tier() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState::default());
    let server = tokio::spawn(serve(listener, state.clone()));

    let fetcher = TieredFetcher::new(
        Some(ProxyGateway {
            base_url: format!("http://{addr}/gateway"),
            api_key: "test-key".to_string(),
        }),
        "us",
        10 * 1024 * 1024,
    );

    let url = format!("http://{addr}/blocked");
    let policy = FetchPolicy::default();
    let cancel = CancellationToken::new();

    let response = fetcher
        .fetch(FetchRequest {
            url: &url,
            policy: &policy,
            timeout: Duration::from_secs(5),
            content_checker: None,
            cancel: &cancel,
        })
        .await
        .unwrap();

    // Escalated direct → standard → premium.
    assert_eq!(response.status_code, 200);
    assert_eq!(response.tier, ProxyTier::Premium);
    assert!(String::from_utf8_lossy(&response.body).contains("Market data"));
    assert_eq!(state.count("direct"), 1);
    assert_eq!(state.count("gateway_standard"), 1);
    assert_eq!(state.count("gateway_premium"), 1);
    assert_eq!(fetcher.cached_tier("127.0.0.1"), Some(ProxyTier::Premium));

    // The next same-host fetch starts at the remembered premium tier: no
    // new direct or standard attempts.
    let again = fetcher
        .fetch(FetchRequest {
            url: &url,
            policy: &policy,
            timeout: Duration::from_secs(5),
            content_checker: None,
            cancel: &cancel,
        })
        .await
        .unwrap();
    assert_eq!(again.tier, ProxyTier::Premium);
    assert_eq!(state.count("direct"), 1);
    assert_eq!(state.count("gateway_standard"), 1);
    assert_eq!(state.count("gateway_premium"), 2);

    server.abort();
}

#[tokio::test]
async fn content_checker_rejection_promotes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState::default());
    let server = tokio::spawn(serve(listener, state.clone()));

    // Direct fetches of /gateway-shaped paths 404; point the page at the
    // gateway path so direct returns a body the checker rejects.
    let fetcher = TieredFetcher::new(
        Some(ProxyGateway {
            base_url: format!("http://{addr}/gateway"),
            api_key: "test-key".to_string(),
        }),
        "us",
        10 * 1024 * 1024,
    );

    // The origin serves 200 with a body the checker refuses, which must
    // push the fetch through the gateway tiers.
    let listener2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr2 = listener2.local_addr().unwrap();
    let state2 = Arc::new(ServerState::default());
    let server2 = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener2.accept().await else {
                return;
            };
            let state2 = state2.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                state2.record("origin");
                let body = "captcha wall";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });

    let url = format!("http://{addr2}/wall");
    let policy = FetchPolicy::default();
    let cancel = CancellationToken::new();
    let checker = |body: &[u8]| !String::from_utf8_lossy(body).contains("captcha");

    let response = fetcher
        .fetch(FetchRequest {
            url: &url,
            policy: &policy,
            timeout: Duration::from_secs(5),
            content_checker: Some(&checker),
            cancel: &cancel,
        })
        .await
        .unwrap();

    // The direct 200 was rejected; the gateway's premium tier won.
    assert_eq!(response.tier, ProxyTier::Premium);
    assert!(String::from_utf8_lossy(&response.body).contains("Market data"));

    server.abort();
    server2.abort();
}
