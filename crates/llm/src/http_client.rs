use std::time::Duration;

use reqwest::Client;

/// Shared HTTP client factory for provider adapters.
///
/// One client per adapter instance so connections pool per provider. The
/// short pool idle timeout forces periodic reconnects so upstream DNS
/// changes are picked up; the overall request deadline is enforced by the
/// run engine's attempt budget, not here.
pub(crate) fn http_client(pool_size: usize) -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .pool_max_idle_per_host(pool_size)
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .build()
        .expect("failed to build default HTTP client")
}
