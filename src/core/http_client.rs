use std::time::Duration;

use crate::models::settings::ProxySettings;

const USER_AGENT: &str = concat!("urlrelay/", env!("CARGO_PKG_VERSION"));

pub fn apply_proxy(
    builder: reqwest::ClientBuilder,
    proxy: &ProxySettings,
) -> reqwest::ClientBuilder {
    let Some(proxy_url) = proxy.url.as_deref().filter(|u| !u.is_empty()) else {
        return builder;
    };
    match reqwest::Proxy::all(proxy_url) {
        Ok(p) => builder.proxy(p),
        Err(e) => {
            tracing::warn!("Invalid proxy URL: {}", e);
            builder
        }
    }
}

/// Client used for direct downloads. No overall timeout here; the download
/// engine bounds each transfer itself.
///
/// Bodies are never decompressed: files are saved byte for byte, and the
/// declared `Content-Length` has to survive for the error-page check.
pub fn build_client(proxy: &ProxySettings) -> anyhow::Result<reqwest::Client> {
    let builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::limited(10))
        .no_gzip()
        .no_brotli()
        .no_deflate();
    Ok(apply_proxy(builder, proxy).build()?)
}
