use futures::StreamExt;
use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::stats::Meter;
use super::throughput::{absorb, bounded, lane_should_continue};
use super::{cache_busted, Direction, ProbeError};

/// One download lane: fetch the payload source over and over until the phase ends.
pub async fn download_lane(
    client: &Client,
    endpoint: &str,
    lane: usize,
    meter: &Meter,
    token: &CancellationToken,
) -> Result<(), ProbeError> {
    while lane_should_continue(meter, token) {
        absorb(Direction::Download, lane, fetch_once(client, endpoint, lane, meter, token).await)?;
    }
    trace!(lane, "download lane finished");
    Ok(())
}

async fn fetch_once(
    client: &Client,
    endpoint: &str,
    lane: usize,
    meter: &Meter,
    token: &CancellationToken,
) -> Result<(), ProbeError> {
    let url = cache_busted(endpoint, lane)?;
    let request = client.get(url).header(CACHE_CONTROL, "no-store").send();
    let Some(response) = bounded(meter, token, request).await? else {
        return Ok(());
    };
    let response = response?;
    if !response.status().is_success() {
        return Err(ProbeError::Status(response.status()));
    }

    let mut stream = response.bytes_stream();
    // Returning drops the stream, which cancels the rest of the body.
    loop {
        let Some(next) = bounded(meter, token, stream.next()).await? else {
            return Ok(());
        };
        let Some(chunk) = next else {
            return Ok(());
        };
        let chunk = chunk?;
        meter.record(chunk.len() as u64);

        if meter.expired() {
            return Ok(());
        }
    }
}
