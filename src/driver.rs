use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::Request;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

use crate::error::TransportError;
use crate::pool::{CompletedExchange, Handle};
use crate::request::PreparedRequest;
use crate::transport::{ReqBody, SectionClient, classify_transport_error};

/// Responses are accumulated into one contiguous buffer; anything past
/// this is treated as a transport failure rather than streamed.
const MAX_RESPONSE_BODY_BYTES: usize = 16 * 1024 * 1024;

/// An exchange in flight on the multiplexer.
///
/// This is the suspension point handed back to the pipeline scheduler:
/// awaiting it resumes the engine's completion logic exactly once.
/// Dropping it before completion aborts the transfer, so a cancelled
/// invocation never leaves a transfer running against a released handle.
pub(crate) struct OutstandingExchange {
    task: JoinHandle<()>,
    completion: oneshot::Receiver<Result<CompletedExchange, TransportError>>,
}

impl Future for OutstandingExchange {
    type Output = Result<CompletedExchange, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.completion).poll(cx).map(|received| {
            received.unwrap_or(Err(TransportError::Cancelled))
        })
    }
}

impl Drop for OutstandingExchange {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Registers a configured exchange with the runtime's multiplexer.
///
/// Invalid handle or request state is reported synchronously here;
/// anything that happens during the transfer (DNS, TLS, timeout)
/// surfaces later through the returned future.
pub(crate) fn enqueue(
    client: &SectionClient,
    handle: &Handle,
    prepared: PreparedRequest,
) -> Result<OutstandingExchange, TransportError> {
    if !handle.is_idle() {
        return Err(TransportError::HandleBusy);
    }
    let scheme = prepared.request.uri().scheme_str().unwrap_or_default();
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return Err(TransportError::InvalidScheme {
            scheme: scheme.to_owned(),
        });
    }

    let client = client.clone();
    let (completion_tx, completion) = oneshot::channel();
    let PreparedRequest {
        request,
        timeout: per_call,
    } = prepared;
    let handle_id = handle.id();
    let task = tokio::spawn(async move {
        let result = run_exchange(client, request, per_call).await;
        debug!(handle = handle_id, ok = result.is_ok(), "exchange complete");
        let _ = completion_tx.send(result);
    });

    Ok(OutstandingExchange { task, completion })
}

async fn run_exchange(
    client: SectionClient,
    request: Request<ReqBody>,
    per_call: Duration,
) -> Result<CompletedExchange, TransportError> {
    let timeout_ms = per_call.as_millis();
    let exchange = async {
        let response = client.request(request).await.map_err(|source| {
            let kind = classify_transport_error(&source);
            TransportError::Exchange {
                kind,
                source: Box::new(source),
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = read_all_body_limited(response.into_body(), MAX_RESPONSE_BODY_BYTES).await?;

        Ok(CompletedExchange {
            status,
            headers,
            body,
            peer_chain: client.snapshot_peer_chain(),
        })
    };

    match timeout(per_call, exchange).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout { timeout_ms }),
    }
}

/// Accumulates response frames into one contiguous buffer as they
/// arrive. Downstream logic never sees fragments.
async fn read_all_body_limited(
    mut body: Incoming,
    max_bytes: usize,
) -> Result<Bytes, TransportError> {
    let mut collected = Vec::new();
    let mut total_len = 0_usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|source| TransportError::ReadBody {
            source: Box::new(source),
        })?;
        if let Some(data) = frame.data_ref() {
            total_len = total_len.saturating_add(data.len());
            if total_len > max_bytes {
                return Err(TransportError::BodyTooLarge {
                    limit_bytes: max_bytes,
                    actual_bytes: total_len,
                });
            }
            collected.extend_from_slice(data);
        }
    }

    Ok(Bytes::from(collected))
}
