use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use futures::{stream, TryStreamExt};
use rand::{Rng, SeedableRng};
use reqwest::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::stats::Meter;
use super::throughput::{absorb, bounded, lane_should_continue};
use super::{cache_busted, Direction, ProbeError};

/// Pseudo-random payload generated once per phase and shared read-only by all lanes.
pub fn random_payload(size: usize) -> Bytes {
    let mut rng = rand::rngs::StdRng::from_entropy();
    let mut data = vec![0u8; size];
    rng.fill(&mut data[..]);
    Bytes::from(data)
}

/// Cheap views into `payload`, `slice` bytes each (the last one may be shorter).
fn slices(payload: &Bytes, slice: usize) -> Vec<Bytes> {
    let slice = slice.max(1);
    (0..payload.len())
        .step_by(slice)
        .map(|start| payload.slice(start..(start + slice).min(payload.len())))
        .collect()
}

/// One upload lane: post the shared payload repeatedly until the phase ends.
pub async fn upload_lane(
    client: &Client,
    endpoint: &str,
    lane: usize,
    payload: Bytes,
    slice: usize,
    meter: &Arc<Meter>,
    token: &CancellationToken,
) -> Result<(), ProbeError> {
    while lane_should_continue(meter, token) {
        let sent = send_once(client, endpoint, lane, &payload, slice, meter, token).await;
        absorb(Direction::Upload, lane, sent)?;
    }
    trace!(lane, "upload lane finished");
    Ok(())
}

async fn send_once(
    client: &Client,
    endpoint: &str,
    lane: usize,
    payload: &Bytes,
    slice: usize,
    meter: &Arc<Meter>,
    token: &CancellationToken,
) -> Result<(), ProbeError> {
    let url = cache_busted(endpoint, lane)?;

    // Each slice is counted as the transport pulls it, so progress moves
    // while the request is still being written.
    let progress = meter.clone();
    let body = stream::iter(slices(payload, slice).into_iter().map(Ok::<Bytes, Infallible>))
        .inspect_ok(move |chunk| progress.record(chunk.len() as u64));

    let request = client
        .post(url)
        .header(CACHE_CONTROL, "no-store")
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_LENGTH, payload.len())
        .body(Body::wrap_stream(body))
        .send();

    let Some(response) = bounded(meter, token, request).await? else {
        return Ok(());
    };
    let response = response?;
    if !response.status().is_success() {
        return Err(ProbeError::Status(response.status()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_has_requested_size_and_is_not_constant() {
        let payload = random_payload(64 * 1024);
        assert_eq!(payload.len(), 64 * 1024);
        assert!(payload.iter().any(|&b| b != payload[0]));
    }

    #[test]
    fn slices_cover_the_payload() {
        let payload = Bytes::from((0..=255u8).cycle().take(1000).collect::<Vec<_>>());
        let parts = slices(&payload, 300);
        assert_eq!(parts.iter().map(Bytes::len).collect::<Vec<_>>(), vec![300, 300, 300, 100]);
        let joined: Vec<u8> = parts.iter().flat_map(|b| b.iter().copied()).collect();
        assert_eq!(&joined[..], &payload[..]);
    }
}
