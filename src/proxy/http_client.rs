use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_rustls::HttpsConnectorBuilder;
use once_cell::sync::Lazy;
use std::time::Duration;

/// Shared hyper client with connection pooling (HTTP/HTTPS via rustls).
///
/// - Single client instance reused across requests to enable pooling
/// - Redirects are never followed; 3xx responses are proxied verbatim
/// - Per-request timeouts come from the caller's deadline, never from a
///   client-wide setting
static SHARED_CLIENT: Lazy<Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>> =
    Lazy::new(build_client);

pub fn shared_client() -> &'static Client<hyper_rustls::HttpsConnector<HttpConnector>, Body> {
    &SHARED_CLIENT
}

fn build_client() -> Client<hyper_rustls::HttpsConnector<HttpConnector>, Body> {
    let mut http = HttpConnector::new();
    http.enforce_http(false); // allow https URIs through the wrapped connector
    http.set_nodelay(true);

    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();

    Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .build::<_, Body>(https)
}
