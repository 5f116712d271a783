use std::net::IpAddr;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum_client_ip::InsecureClientIp;
use bytes::Bytes;
use http_body_util::LengthLimitError;
use tracing::{debug, error, instrument, Span};

use crate::api::{ImportError, REQUEST_ERROR_TOTAL, RESPONSE_DURATION_NS};
use crate::decoder::decode_body;
use crate::encoding::ContentEncoding;
use crate::forwarder::Dispatch;
use crate::router::{self, RequestLimits};

/// Per-request state, only used to tag logs and metrics.
#[derive(Debug)]
pub struct RequestContext {
    pub client: IpAddr,
    pub encoding: Option<ContentEncoding>,
    pub start: Instant,
}

impl RequestContext {
    /// Negotiated encoding, or the raw token the client sent when it was
    /// rejected.
    fn encoding_tag<'a>(&self, err: &'a ImportError) -> &'a str {
        match (self.encoding, err) {
            (Some(encoding), _) => encoding.as_str(),
            (None, ImportError::UnsupportedEncoding(token)) => token,
            (None, _) => "unknown",
        }
    }
}

#[instrument(skip_all, fields(client, encoding, batch_size))]
pub async fn import(
    state: State<router::State>,
    InsecureClientIp(ip): InsecureClientIp,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, ImportError> {
    let mut context = RequestContext {
        client: ip,
        encoding: None,
        start: Instant::now(),
    };
    Span::current().record("client", tracing::field::display(ip));

    let result = accept(&state, &mut context, &headers, body).await;

    if let Err(err) = &result {
        error!(
            client = %context.client,
            encoding = context.encoding_tag(err),
            cause = err.cause(),
            "rejected /import request: {}",
            err
        );
        let cause = format!("cause:{}", err.cause());
        state
            .stats
            .count(REQUEST_ERROR_TOTAL, 1, &[cause.as_str()], 1.0);
    }

    result
}

async fn accept(
    state: &router::State,
    context: &mut RequestContext,
    headers: &HeaderMap,
    body: Body,
) -> Result<StatusCode, ImportError> {
    let encoding = ContentEncoding::from_headers(headers)?;
    context.encoding = Some(encoding);
    Span::current().record("encoding", encoding.as_str());

    let body = read_body(body, &state.limits).await?;
    let batch = decode_body(encoding, &body)?;
    Span::current().record("batch_size", batch.len());

    let slot = state.forwarder.try_reserve()?;

    let encoding_tag = format!("encoding:{}", encoding.as_str());
    state.stats.timing(
        RESPONSE_DURATION_NS,
        context.start.elapsed().as_nanos() as f64,
        &["part:request", encoding_tag.as_str()],
        1.0,
    );

    let records = batch.len();
    if slot.send(batch) == Dispatch::Queued {
        debug!(records, "queued metrics batch");
    }

    Ok(StatusCode::ACCEPTED)
}

async fn read_body(body: Body, limits: &RequestLimits) -> Result<Bytes, ImportError> {
    match tokio::time::timeout(
        limits.body_read_timeout,
        to_bytes(body, limits.max_body_bytes),
    )
    .await
    {
        Err(_) => Err(ImportError::BodyReadTimeout),
        Ok(Err(err)) => {
            let err = err.into_inner();
            if err.is::<LengthLimitError>() {
                Err(ImportError::PayloadTooLarge(limits.max_body_bytes))
            } else {
                Err(ImportError::BodyReadError(err.to_string()))
            }
        }
        Ok(Ok(bytes)) => Ok(bytes),
    }
}
