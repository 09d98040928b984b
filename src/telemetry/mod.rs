//! # Telemetry Module
//!
//! Accumulates per-cycle measurement records and guarantees they
//! eventually reach the remote log across connectivity outages.
//!
//! This module handles:
//! - Building the current cycle's record (insertion-ordered key/value)
//! - Spooling undelivered batches to a local file while offline
//! - Pulling the backlog forward once connectivity returns
//! - Serializing the combined sequence for one remote append
//!
//! The spool file is a concatenation of independently serialized JSON
//! chunks, one per offline cycle, not one coherent document; loading reads
//! the chunk stream back as a single logical sequence. The remote log is
//! append-only and eventually holds the union of every record produced.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use bytes::Bytes;
use serde_json::{Deserializer, Map, Value};
use tracing::{debug, info};

use crate::error::Result;

/// One cycle's measurements: metric name → value, insertion-ordered.
pub type TelemetryRecord = Map<String, Value>;

/// Ordered sequence of telemetry records plus its local spool file.
#[derive(Debug)]
pub struct TelemetryLog {
    records: Vec<TelemetryRecord>,
    spool_path: PathBuf,
    /// Delete the spool as soon as it is loaded (before the remote append
    /// is acknowledged). The historical ordering; `false` defers deletion
    /// to [`TelemetryLog::discard_spool`] after a confirmed delivery.
    delete_spool_on_load: bool,
}

impl TelemetryLog {
    /// Create a log holding one empty record for the current cycle.
    pub fn new(spool_path: PathBuf, delete_spool_on_load: bool) -> Self {
        Self {
            records: vec![TelemetryRecord::new()],
            spool_path,
            delete_spool_on_load,
        }
    }

    /// Add a data point to the current cycle's record.
    pub fn add(&mut self, key: &str, value: impl Into<Value>) {
        if let Some(record) = self.records.last_mut() {
            record.insert(key.to_string(), value.into());
        }
    }

    /// The full in-memory sequence, oldest first.
    pub fn records(&self) -> &[TelemetryRecord] {
        &self.records
    }

    /// Load spooled records from prior cycles and prepend them before the
    /// in-memory sequence, so older unsent batches precede the current
    /// record. Returns the number of records pulled forward.
    ///
    /// In the default configuration the spool is deleted as part of
    /// loading, before any delivery confirmation; a remote append failure
    /// right after loses the batch.
    pub fn load_diagnostics(&mut self) -> Result<usize> {
        if !self.spool_path.exists() {
            return Ok(0);
        }

        let buf = fs::read(&self.spool_path)?;
        let mut combined: Vec<TelemetryRecord> = Vec::new();
        for chunk in Deserializer::from_slice(&buf).into_iter::<Vec<TelemetryRecord>>() {
            combined.extend(chunk?);
        }

        let loaded = combined.len();
        combined.append(&mut self.records);
        self.records = combined;

        if self.delete_spool_on_load {
            fs::remove_file(&self.spool_path)?;
        }

        info!("Loaded {} spooled telemetry records", loaded);
        Ok(loaded)
    }

    /// Overwrite the spool with the full current in-memory sequence.
    pub fn save_diagnostics(&self) -> Result<()> {
        let mut data = serde_json::to_vec(&self.records)?;
        data.push(b'\n');
        fs::write(&self.spool_path, data)?;
        debug!("Saved {} telemetry records to spool", self.records.len());
        Ok(())
    }

    /// Append the current in-memory sequence onto the spool as an
    /// independent chunk. Called once per offline cycle, so the spool
    /// grows monotonically until connectivity returns.
    pub fn append_diagnostics_to_file(&self) -> Result<()> {
        let mut data = serde_json::to_vec(&self.records)?;
        data.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.spool_path)?;
        file.write_all(&data)?;

        debug!(
            "Appended {} telemetry records to spool",
            self.records.len()
        );
        Ok(())
    }

    /// Serialize the current in-memory sequence for direct network
    /// transmission.
    pub fn get_data_as_bytes(&self) -> Result<Bytes> {
        let mut data = serde_json::to_vec(&self.records)?;
        data.push(b'\n');
        Ok(Bytes::from(data))
    }

    /// Remove the spool after a confirmed delivery (delete-after-ack
    /// ordering).
    pub fn discard_spool(&self) -> Result<()> {
        if self.spool_path.exists() {
            fs::remove_file(&self.spool_path)?;
        }
        Ok(())
    }

    /// Whether undelivered batches are currently spooled.
    pub fn spool_exists(&self) -> bool {
        self.spool_path.exists()
    }
}
