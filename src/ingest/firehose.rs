//! The cloud-delivery-stream ingestion handler (C5): decodes a firehose-style delivery
//! envelope into events and submits them as one batch.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{http::HeaderMap, Json};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::event::{Destination, Event, Processor};
use crate::ingest::{AppState, IngestError};
use crate::metrics::Metrics;

const ACCESS_KEY_HEADER: &str = "X-Amz-Firehose-Access-Key";
const SOURCE_ARN_HEADER: &str = "X-Amz-Firehose-Source-Arn";

#[derive(Debug, Deserialize)]
pub struct FirehoseRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub timestamp: i64,
    pub records: Vec<FirehoseRecord>,
}

#[derive(Debug, Deserialize)]
pub struct FirehoseRecord {
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct FirehoseResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub timestamp: i64,
}

/// The parts of an ARN-shaped source identifier this handler cares about, per
/// `arn:aws:<service>:<region>:<account>:<resource>`.
#[derive(Debug, Default, Clone)]
struct SourceArn {
    partition: String,
    service: String,
    region: String,
    account: String,
    resource: String,
}

fn parse_source_arn(value: &str) -> SourceArn {
    let parts: Vec<&str> = value.splitn(6, ':').collect();
    SourceArn {
        partition: parts.get(1).copied().unwrap_or_default().to_string(),
        service: parts.get(2).copied().unwrap_or_default().to_string(),
        region: parts.get(3).copied().unwrap_or_default().to_string(),
        account: parts.get(4).copied().unwrap_or_default().to_string(),
        resource: parts.get(5).copied().unwrap_or_default().to_string(),
    }
}

pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(envelope): Json<FirehoseRequest>,
) -> Response {
    handle(state, headers, envelope).await
}

async fn handle(state: AppState, headers: HeaderMap, envelope: FirehoseRequest) -> Response {
    let request_id = envelope.request_id.clone();
    let timestamp = envelope.timestamp;

    if let Err(err) = authenticate(&state, &headers) {
        return err.into_response_with(request_id, timestamp);
    }

    let events = match build_events(&state, &headers, &envelope) {
        Ok(events) => events,
        Err(err) => return err.into_response_with(request_id, timestamp),
    };

    for _ in &events {
        Metrics::event_received();
    }

    match state
        .indexer
        .process_batch(CancellationToken::new(), &events)
        .await
    {
        Ok(()) => Json(FirehoseResponse { request_id, timestamp }).into_response(),
        Err(e) => IngestError::from(e).into_response_with(request_id, timestamp),
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<(), IngestError> {
    let provided = headers
        .get(ACCESS_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided.is_empty() || provided != state.expected_access_key {
        return Err(IngestError::Unauthorized);
    }
    Ok(())
}

fn build_events(
    state: &AppState,
    headers: &HeaderMap,
    envelope: &FirehoseRequest,
) -> Result<Vec<Event>, IngestError> {
    let source_arn = headers
        .get(SOURCE_ARN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(parse_source_arn)
        .unwrap_or_default();

    let destination = match Destination::new("logs", &state.dataset, &source_arn.resource) {
        Ok(destination) => destination,
        Err(_) => {
            warn!(
                resource = %source_arn.resource,
                "source ARN resource identifier rejected by destination validation, \
                 routing events to the default destination instead"
            );
            Destination::new("logs", &state.dataset, "default")
                .map_err(|e| IngestError::Internal(e.to_string()))?
        }
    };

    let envelope_time = DateTime::<Utc>::from_timestamp_millis(envelope.timestamp)
        .ok_or_else(|| IngestError::BadRequest("invalid envelope timestamp".into()))?;

    let mut events = Vec::new();
    for record in &envelope.records {
        let decoded = BASE64
            .decode(&record.data)
            .map_err(|e| IngestError::BadRequest(format!("invalid base64 record: {e}")))?;

        for line in decoded.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let message = String::from_utf8_lossy(line).into_owned();
            events.push(Event::new(
                envelope_time,
                Processor::Log,
                destination.clone(),
                serde_json::json!({
                    "message": message,
                    "source": {
                        "partition": source_arn.partition,
                        "service": source_arn.service,
                        "region": source_arn.region,
                        "account": source_arn.account,
                        "resource": source_arn.resource,
                    },
                }),
            ));
        }
    }

    Ok(events)
}
