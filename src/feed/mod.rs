// =============================================================================
// Feed Adapter — websocket ingestion of bar/status events
// =============================================================================
//
// Wire framing is out of scope for this engine's core (the upstream protocol
// is a thin JSON-array-of-events shape); the reconnect loop itself is ambient
// robustness and is grounded in the same retry-on-disconnect idiom used for
// this codebase's original kline stream consumer.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::model::Bar;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// One decoded event off the feed.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    MinuteBar { sym: String, bar: Bar },
    SecondBar { sym: String, bar: Bar },
    Subscribed { channel: String, sym: String },
    Unsubscribed { channel: String, sym: String },
}

/// Runs the reconnect loop, sending decoded events to `tx` until the process
/// shuts down. A connect or read failure is logged and retried after a fixed
/// backoff; it never returns early just because one connection attempt
/// failed, so a transport outage cannot stop future reconnection attempts.
pub async fn run(url: String, tx: mpsc::UnboundedSender<FeedEvent>) {
    loop {
        match run_once(&url, &tx).await {
            Ok(()) => {
                warn!(url = %url, "feed stream ended, reconnecting");
            }
            Err(e) => {
                error!(error = %e, url = %url, "feed stream failed, reconnecting");
            }
        }
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

async fn run_once(url: &str, tx: &mpsc::UnboundedSender<FeedEvent>) -> Result<()> {
    info!(url = %url, "connecting to feed websocket");
    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to feed websocket")?;
    info!(url = %url, "feed websocket connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                match parse_events(&text) {
                    Ok(events) => {
                        for event in events {
                            debug!(?event, "feed event");
                            if tx.send(event).is_err() {
                                // Receiver dropped: engine is shutting down.
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to parse feed frame, skipping");
                    }
                }
            }
            Some(Ok(_)) => {
                // Ping/Pong/Binary/Close frames carry no strategy data.
            }
            Some(Err(e)) => {
                return Err(e).context("feed websocket read error");
            }
            None => return Ok(()),
        }
    }
}

/// Parse a single feed frame, which carries a JSON array of events.
fn parse_events(text: &str) -> Result<Vec<FeedEvent>> {
    let root: serde_json::Value = serde_json::from_str(text).context("failed to parse feed JSON")?;
    let arr = root.as_array().context("feed frame is not a JSON array")?;

    let mut events = Vec::with_capacity(arr.len());
    for item in arr {
        if let Some(event) = parse_one(item)? {
            events.push(event);
        }
    }
    Ok(events)
}

fn parse_one(item: &serde_json::Value) -> Result<Option<FeedEvent>> {
    let ev = item["ev"].as_str().unwrap_or_default();

    match ev {
        "AM" | "A" => {
            let sym = item["sym"].as_str().context("bar event missing 'sym'")?.to_string();
            let bar = Bar {
                s: item["s"].as_i64().context("bar event missing 's'")?,
                e: item["e"].as_i64().context("bar event missing 'e'")?,
                o: item["o"].as_f64().context("bar event missing 'o'")?,
                h: item["h"].as_f64().context("bar event missing 'h'")?,
                l: item["l"].as_f64().context("bar event missing 'l'")?,
                c: item["c"].as_f64().context("bar event missing 'c'")?,
                v: item["v"].as_f64().context("bar event missing 'v'")?,
            };
            if ev == "AM" {
                Ok(Some(FeedEvent::MinuteBar { sym, bar }))
            } else {
                Ok(Some(FeedEvent::SecondBar { sym, bar }))
            }
        }
        "status" => {
            let message = item["message"].as_str().unwrap_or_default();
            Ok(parse_status_message(message))
        }
        other => {
            debug!(ev = other, "ignoring unrecognized feed event kind");
            Ok(None)
        }
    }
}

/// Status messages look like `"subscribed to: AM.AAPL"` or
/// `"unsubscribed to: A.AAPL"`.
fn parse_status_message(message: &str) -> Option<FeedEvent> {
    let (verb, rest) = message.split_once(" to: ")?;
    let (channel, sym) = rest.split_once('.')?;

    match verb {
        "subscribed" => Some(FeedEvent::Subscribed {
            channel: channel.to_string(),
            sym: sym.to_string(),
        }),
        "unsubscribed" => Some(FeedEvent::Unsubscribed {
            channel: channel.to_string(),
            sym: sym.to_string(),
        }),
        _ => None,
    }
}
