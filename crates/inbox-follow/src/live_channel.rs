//! Push-channel seam: endpoint derivation and the frame source contract.

use async_trait::async_trait;
use url::Url;

use crate::follow_error::FollowError;

pub const LIVE_CHANNEL_PATH: &str = "/cable";

/// Maps an http(s) base URL onto its ws(s) live channel endpoint. Input that
/// does not parse, or is not http(s), is returned unchanged.
pub fn live_channel_url(base_url: &str) -> String {
    let Ok(mut url) = Url::parse(base_url.trim()) else {
        return base_url.to_string();
    };
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        _ => return base_url.to_string(),
    };
    if url.set_scheme(scheme).is_err() {
        return base_url.to_string();
    }
    let path = format!("{}{LIVE_CHANNEL_PATH}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.to_string()
}

#[async_trait]
/// Yields raw text frames from the push channel; `None` ends the session.
pub trait EventSource: Send {
    async fn next_frame(&mut self) -> Option<Result<String, FollowError>>;
}
