//! Shared helpers for scrape integration tests
//!
//! A [`MockServer`] stands in for both the search provider and the image hosts:
//! result pages are served from `/images/async` and images from `/img/<name>`.

#![allow(dead_code)]

use bingscraper::Config;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// PNG signature followed by a tag so every body hashes differently
pub fn png_body(tag: &str) -> Vec<u8> {
    let mut body = b"\x89PNG\r\n\x1a\n".to_vec();
    body.extend_from_slice(tag.as_bytes());
    body
}

/// Render a results page fragment the way the provider escapes it
pub fn result_html(urls: &[String]) -> String {
    let mut html = String::from("<div class=\"dgControl\">");
    for url in urls {
        html.push_str(&format!(
            "<a class=\"iusc\" m=\"{{&quot;murl&quot;:&quot;{url}&quot;,&quot;turl&quot;:&quot;https://tse.test/th&quot;}}\"></a>"
        ));
    }
    html.push_str("</div>");
    html
}

/// Serve `urls` as the results page at `first`
pub async fn mount_results_page(server: &MockServer, first: usize, urls: &[String]) {
    Mock::given(method("GET"))
        .and(path("/images/async"))
        .and(query_param("first", first.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(result_html(urls)))
        .mount(server)
        .await;
}

/// Serve `body` at `/img/<name>` and return its absolute URL
pub async fn mount_image(server: &MockServer, name: &str, body: Vec<u8>) -> String {
    Mock::given(method("GET"))
        .and(path(format!("/img/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
    format!("{}/img/{name}", server.uri())
}

/// Number of image requests the server has received so far
pub async fn image_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path().starts_with("/img/"))
        .count()
}

/// Config pointed at `server` with all state under `dir`
pub fn config_for(server: &MockServer, dir: &TempDir, query: &str, limit: usize) -> Config {
    let mut config = Config::for_query(query);
    config.search_base_url = server.uri();
    config.output_dir = dir.path().join("images");
    config.tracker_dir = dir.path().join(".bingscraper");
    config.limit = limit;
    config.threads = 8;
    config.page_pause = Duration::from_millis(1);
    config
}

/// Sorted file names in `dir`
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    files.sort();
    files
}
