//! Tick Tape - Append-only JSONL Record of Routed Ticks
//!
//! Persists routed ticks to daily JSONL files in the format
//! `ticks/YYYY-MM-DD.jsonl`. Each line is a self-contained JSON
//! record, so a tape can be replayed or grepped line by line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::domain::tick::RoutedTick;
use crate::ports::price_sink::PriceSink;

/// Append-only JSONL tape with daily file rotation, keyed by tick time.
pub struct TickTape {
    /// Directory holding the daily files.
    ticks_dir: PathBuf,
    /// Serializes appends so lines never interleave.
    write_lock: Mutex<()>,
}

impl TickTape {
    /// Create a tape under `data_dir/ticks`.
    pub async fn new(data_dir: &str) -> Result<Self> {
        let ticks_dir = Path::new(data_dir).join("ticks");

        fs::create_dir_all(&ticks_dir)
            .await
            .context("Failed to create ticks directory")?;

        info!(dir = %ticks_dir.display(), "Tick tape ready");
        Ok(Self {
            ticks_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn day_path(&self, date: NaiveDate) -> PathBuf {
        self.ticks_dir.join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Append one tick to the file of its own trading day.
    #[instrument(skip(self, tick), fields(symbol = %tick.tick.symbol))]
    pub async fn append(&self, tick: &RoutedTick) -> Result<()> {
        let path = self.day_path(tick.tick.timestamp.date_naive());

        let mut json = serde_json::to_string(tick).context("Failed to serialize routed tick")?;
        json.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .context("Failed to open tick tape file")?;

        file.write_all(json.as_bytes())
            .await
            .context("Failed to write routed tick")?;
        file.flush().await.context("Failed to flush tick tape")?;

        Ok(())
    }

    /// Read back one day's tape. Malformed lines are skipped.
    pub async fn load_day(&self, date: NaiveDate) -> Result<Vec<RoutedTick>> {
        let path = self.day_path(date);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path).await?;
        let mut ticks = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<RoutedTick>(line) {
                Ok(tick) => ticks.push(tick),
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping malformed tape line"),
            }
        }
        Ok(ticks)
    }
}

#[async_trait]
impl PriceSink for TickTape {
    async fn on_routed_tick(&self, tick: RoutedTick) -> anyhow::Result<()> {
        self.append(&tick).await
    }
}
