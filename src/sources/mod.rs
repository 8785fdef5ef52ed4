pub mod emsc;
pub mod ign;
pub mod usgs;

use std::time::Duration;
use tracing::warn;

use crate::raw_event::RawEvent;

/// Builds the per-adapter HTTP client the way `location.rs::geocode_address`
/// builds its geocoder client: an explicit bounded timeout, nothing else.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Fetches one source and never lets a transport/parse failure escape —
/// degrades to an empty list plus a warning, the source never aborts the
/// cycle.
pub async fn fetch_or_empty<F, Fut>(source: &str, fetch: F) -> Vec<RawEvent>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<Vec<RawEvent>>>,
{
    match fetch().await {
        Ok(events) => events,
        Err(error) => {
            warn!(source, error = %error, "[*] source adapter failed; treating as empty for this cycle");
            Vec::new()
        }
    }
}
