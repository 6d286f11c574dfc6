use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use orion_error::compat_prelude::*;
use orion_error::prelude::*;
use serde::Serialize;

use crate::error::{CoreReason, CoreResult};
use crate::ports::{CommandRepository, InsightRepository};

use super::types::{Command, Insight};

/// Appends records as JSON Lines to a file.
///
/// Each batch is written and flushed under one lock, so concurrent batches
/// never interleave lines.
pub struct JsonlSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).owe(CoreReason::Sink)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .owe(CoreReason::Sink)
            .position(path.as_ref().display().to_string())?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn write_records<T: Serialize>(&self, records: &[T]) -> CoreResult<()> {
        let mut w = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        for record in records {
            let json = serde_json::to_string(record).owe(CoreReason::DataFormat)?;
            w.write_all(json.as_bytes()).owe(CoreReason::Sink)?;
            w.write_all(b"\n").owe(CoreReason::Sink)?;
        }
        w.flush().owe(CoreReason::Sink)?;
        Ok(())
    }
}

#[async_trait]
impl InsightRepository for JsonlSink {
    async fn append_insights(&self, insights: &[Insight]) -> CoreResult<()> {
        self.write_records(insights)
    }
}

#[async_trait]
impl CommandRepository for JsonlSink {
    async fn append_commands(&self, commands: &[Command]) -> CoreResult<()> {
        self.write_records(commands)
    }
}
