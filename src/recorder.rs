//! # Flight Data Recorder
//!
//! Serializes every message crossing the bus into a row-oriented flight log.
//!
//! The recorder subscribes under the wildcard tag and appends one JSON
//! object per message (JSONL) to a timestamped file. Writes are buffered so
//! the handler never holds the publisher for long; the buffer is flushed on
//! `close`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{Local, Utc};
use mavlink::common::MavMessage;
use mavlink::Message;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bus::{SubscriptionToken, TelemetryBus, ALL_MESSAGES};

#[derive(Serialize)]
struct FlightRecord<'a> {
    ts: String,
    #[serde(rename = "type")]
    kind: &'static str,
    system_id: u8,
    data: &'a MavMessage,
}

/// Wildcard bus subscriber writing a JSONL flight log
pub struct DataRecorder {
    writer: Arc<Mutex<BufWriter<File>>>,
    path: PathBuf,
    token: Option<SubscriptionToken>,
}

impl DataRecorder {
    /// Create a log file under `dir` and subscribe to every message
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be created.
    pub fn attach(bus: &Arc<TelemetryBus>, dir: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "flight-{}.jsonl",
            Local::now().format("%Y%m%d-%H%M%S")
        ));
        let file = File::create(&path)?;
        let writer = Arc::new(Mutex::new(BufWriter::new(file)));

        let sink = Arc::clone(&writer);
        let token = bus.subscribe(
            ALL_MESSAGES,
            Arc::new(move |msg| {
                let record = FlightRecord {
                    ts: Utc::now().to_rfc3339(),
                    kind: msg.message.message_name(),
                    system_id: msg.header.system_id,
                    data: &msg.message,
                };
                match serde_json::to_string(&record) {
                    Ok(line) => {
                        let mut writer = sink.lock().unwrap();
                        // A full disk must not take the telemetry path down
                        if let Err(e) = writeln!(writer, "{line}") {
                            debug!("failed to append flight record: {e}");
                        }
                    }
                    Err(e) => debug!("failed to serialize flight record: {e}"),
                }
            }),
        );

        info!("recording flight data to {}", path.display());
        Ok(Self {
            writer,
            path,
            token: Some(token),
        })
    }

    /// Where this recorder is writing
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unsubscribe and flush the log
    pub fn close(mut self, bus: &TelemetryBus) {
        if let Some(token) = self.token.take() {
            bus.unsubscribe(token);
        }
        if let Err(e) = self.writer.lock().unwrap().flush() {
            warn!("failed to flush flight log: {e}");
        }
        info!("flight log closed at {}", self.path.display());
    }
}
