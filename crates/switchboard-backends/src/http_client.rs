//! Shared HTTP client for HTTPS connectors
//!
//! One process-wide pooled client is shared across connectors.

use once_cell::sync::Lazy;
use reqwest::Client;

const DISABLE_SYSTEM_PROXY_ENV: &str = "SWITCHBOARD_DISABLE_SYSTEM_PROXY";

/// Build a standard HTTP client respecting proxy settings.
pub fn build_http_client() -> Client {
    let builder = if should_disable_system_proxy() {
        Client::builder().no_proxy()
    } else {
        Client::builder()
    };
    builder.build().unwrap_or_default()
}

/// The process-wide shared client.
pub fn shared_client() -> Client {
    static CLIENT: Lazy<Client> = Lazy::new(build_http_client);
    CLIENT.clone()
}

fn should_disable_system_proxy() -> bool {
    if std::env::var_os(DISABLE_SYSTEM_PROXY_ENV).is_some() {
        return true;
    }
    cfg!(test)
}
