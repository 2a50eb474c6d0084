//! Event intake loop between the host application and the dispatcher.
//!
//! The host writes one JSON event per line; every line gets exactly one JSON
//! reply line. A shutdown request stops intake immediately, while a dispatch
//! already in flight gets a grace period to finish.

use std::time::Duration;

use anyhow::{Context, Result};
use hookcast_core::Event;
use hookcast_delivery::{DispatchReport, Dispatcher};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One reply line written for every non-blank input line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeReply {
    /// The event was dispatched.
    Report(DispatchReport),
    /// The line could not be parsed as an event.
    Invalid {
        /// 1-based input line number.
        line: usize,
        /// Parser error.
        error: String,
    },
    /// The dispatch aborted before any delivery.
    Failed {
        /// Event that was not dispatched.
        event_name: String,
        /// Reason the dispatch aborted.
        error: String,
    },
}

/// Counters for one bridge run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeSummary {
    /// Non-blank lines read.
    pub lines: usize,
    /// Events dispatched to completion.
    pub dispatched: usize,
    /// Lines rejected as malformed.
    pub invalid: usize,
    /// Dispatches that aborted.
    pub failed: usize,
    /// Set when the grace period ran out with a dispatch still in flight.
    pub abandoned: bool,
}

/// Reads events from `reader` and dispatches them one at a time.
///
/// Returns when the input ends or `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if reading input or writing a reply fails.
pub async fn run<R, W>(
    dispatcher: &Dispatcher,
    reader: R,
    mut writer: W,
    shutdown: CancellationToken,
    grace: Duration,
) -> Result<BridgeSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut summary = BridgeSummary::default();
    let mut lines = reader.lines();
    let mut line_number = 0;

    loop {
        let line = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                info!("Shutdown requested, no longer accepting events");
                break;
            },
            line = lines.next_line() => line.context("Failed to read event stream")?,
        };

        let Some(line) = line else {
            debug!("Event stream closed");
            break;
        };
        line_number += 1;

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        summary.lines += 1;

        let event: Event = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_number, error = %e, "Discarding malformed event");
                summary.invalid += 1;
                write_reply(&mut writer, &BridgeReply::Invalid { line: line_number, error: e.to_string() })
                    .await?;
                continue;
            },
        };

        let dispatch = dispatcher.dispatch(&event);
        tokio::pin!(dispatch);

        let result = tokio::select! {
            result = &mut dispatch => result,
            () = shutdown.cancelled() => {
                info!(
                    event_name = %event.name,
                    grace_seconds = grace.as_secs(),
                    "Shutdown requested, waiting for in-flight dispatch"
                );
                if let Ok(result) = tokio::time::timeout(grace, &mut dispatch).await {
                    result
                } else {
                    warn!(event_name = %event.name, "Grace period expired, abandoning dispatch");
                    summary.abandoned = true;
                    break;
                }
            },
        };

        let reply = match result {
            Ok(report) => {
                summary.dispatched += 1;
                BridgeReply::Report(report)
            },
            Err(e) => {
                error!(event_name = %event.name, error = %e, "Dispatch failed");
                summary.failed += 1;
                BridgeReply::Failed { event_name: event.name.clone(), error: e.to_string() }
            },
        };
        write_reply(&mut writer, &reply).await?;
    }

    writer.flush().await.context("Failed to flush replies")?;
    info!(
        lines = summary.lines,
        dispatched = summary.dispatched,
        invalid = summary.invalid,
        failed = summary.failed,
        "Event intake stopped"
    );
    Ok(summary)
}

async fn write_reply<W>(writer: &mut W, reply: &BridgeReply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(reply).context("Failed to serialize reply")?;
    line.push(b'\n');
    writer.write_all(&line).await.context("Failed to write reply")?;
    writer.flush().await.context("Failed to flush reply")
}
