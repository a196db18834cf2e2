//! Durable JSON Lines store.
//!
//! Two append-only files under the data directory:
//! - `candles.jsonl`: one `CandleRecord` per line, only newly inserted rows
//! - `prices.jsonl`: one `PriceTick` per line, later lines replace earlier
//!   ones with the same key
//!
//! The files are replayed into an in-memory index on open. A line that
//! fails to parse is skipped with a warning, so an interrupted write only
//! loses that line. Retention cleanup compacts both files.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use kline_core::{BoxFuture, Candle, PriceTick, Timeframe};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::memory::CandleIndex;
use crate::store::{CandleStore, CleanupReport, StoreStats};

const CANDLES_FILE: &str = "candles.jsonl";
const PRICES_FILE: &str = "prices.jsonl";

/// One persisted candle row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CandleRecord {
    symbol: String,
    timeframe: Timeframe,
    #[serde(flatten)]
    candle: Candle,
}

struct JsonlState {
    index: CandleIndex,
    candles: BufWriter<File>,
    prices: BufWriter<File>,
}

/// Store persisted as JSON Lines files with an in-memory index.
pub struct JsonlStore {
    dir: PathBuf,
    state: Mutex<JsonlState>,
}

fn open_append(path: &Path) -> StoreResult<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Parse every line of `path`, skipping lines that fail to parse.
fn replay<T, F>(path: &Path, mut apply: F) -> StoreResult<(usize, usize)>
where
    T: for<'de> Deserialize<'de>,
    F: FnMut(T),
{
    if !path.exists() {
        return Ok((0, 0));
    }

    let reader = BufReader::new(File::open(path)?);
    let mut loaded = 0;
    let mut skipped = 0;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(record) => {
                apply(record);
                loaded += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), line = line_no + 1, error = %e, "Skipping corrupt line");
                skipped += 1;
            }
        }
    }
    Ok((loaded, skipped))
}

/// Write `records` to a temp file next to `path`, one per line.
fn write_temp<I, T>(path: &Path, records: I) -> StoreResult<PathBuf>
where
    I: IntoIterator<Item = T>,
    T: Serialize,
{
    let tmp = path.with_extension("jsonl.tmp");
    let mut writer = BufWriter::new(File::create(&tmp)?);
    for record in records {
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(tmp)
}

impl JsonlStore {
    /// Open (or create) a store in `dir`, replaying existing files.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let candles_path = dir.join(CANDLES_FILE);
        let prices_path = dir.join(PRICES_FILE);

        let mut index = CandleIndex::default();
        let (candles_loaded, candles_skipped) = replay(&candles_path, |r: CandleRecord| {
            index.insert_candles(&r.symbol, r.timeframe, &[r.candle]);
        })?;
        let (prices_loaded, prices_skipped) = replay(&prices_path, |t: PriceTick| {
            index.upsert_price(&t);
        })?;

        info!(
            dir = %dir.display(),
            candles_loaded,
            candles_skipped,
            prices_loaded,
            prices_skipped,
            "Opened JSON Lines store"
        );

        Ok(Self {
            state: Mutex::new(JsonlState {
                index,
                candles: open_append(&candles_path)?,
                prices: open_append(&prices_path)?,
            }),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append_candles(&self, symbol: &str, timeframe: Timeframe, candles: &[Candle]) -> StoreResult<usize> {
        let mut state = self.state.lock();
        let fresh = state.index.new_candles(symbol, timeframe, candles);
        if fresh.is_empty() {
            return Ok(0);
        }

        for candle in &fresh {
            let record = CandleRecord {
                symbol: symbol.to_string(),
                timeframe,
                candle: *candle,
            };
            serde_json::to_writer(&mut state.candles, &record)?;
            state.candles.write_all(b"\n")?;
        }
        state.candles.flush()?;

        let inserted = state.index.insert_candles(symbol, timeframe, &fresh);
        debug!(%symbol, %timeframe, inserted, "Appended candles");
        Ok(inserted)
    }

    fn append_price(&self, tick: &PriceTick) -> StoreResult<bool> {
        let mut state = self.state.lock();
        serde_json::to_writer(&mut state.prices, tick)?;
        state.prices.write_all(b"\n")?;
        state.prices.flush()?;
        Ok(state.index.upsert_price(tick))
    }

    /// Rewrite both files without rows older than `cutoff`.
    ///
    /// The index is only pruned once both files are replaced, and the append
    /// handles are reopened whatever the outcome.
    fn compact(&self, cutoff: i64) -> StoreResult<CleanupReport> {
        let mut state = self.state.lock();
        let mut pruned = state.index.clone();
        let report = pruned.delete_older_than(cutoff);
        if report.total() == 0 {
            return Ok(report);
        }

        state.candles.flush()?;
        state.prices.flush()?;

        let candles_path = self.dir.join(CANDLES_FILE);
        let prices_path = self.dir.join(PRICES_FILE);
        let replaced = Self::replace_files(&pruned, &candles_path, &prices_path);

        // After a rename the old handles point at unlinked files.
        let reopened = Self::reopen(&mut state, &candles_path, &prices_path);

        if let Err(e) = replaced {
            warn!(cutoff, error = %e, "Compaction failed, keeping existing rows");
            return Err(e);
        }
        reopened?;

        state.index = pruned;
        info!(
            cutoff,
            candles_deleted = report.candles_deleted,
            prices_deleted = report.prices_deleted,
            "Compacted JSON Lines store"
        );
        Ok(report)
    }

    fn replace_files(
        index: &CandleIndex,
        candles_path: &Path,
        prices_path: &Path,
    ) -> StoreResult<()> {
        let candles_tmp = write_temp(
            candles_path,
            index.iter_candles().map(|((symbol, timeframe), candle)| CandleRecord {
                symbol: symbol.clone(),
                timeframe: *timeframe,
                candle: *candle,
            }),
        )?;
        let prices_tmp = match write_temp(prices_path, index.iter_prices()) {
            Ok(tmp) => tmp,
            Err(e) => {
                if let Err(rm) = fs::remove_file(&candles_tmp) {
                    debug!(error = %rm, "Failed to remove candle temp file");
                }
                return Err(e);
            }
        };

        fs::rename(&candles_tmp, candles_path)?;
        fs::rename(&prices_tmp, prices_path)?;
        Ok(())
    }

    fn reopen(state: &mut JsonlState, candles_path: &Path, prices_path: &Path) -> StoreResult<()> {
        state.candles = open_append(candles_path)?;
        state.prices = open_append(prices_path)?;
        Ok(())
    }
}

impl CandleStore for JsonlStore {
    fn latest_timestamp<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
    ) -> BoxFuture<'a, StoreResult<Option<i64>>> {
        Box::pin(async move { Ok(self.state.lock().index.latest_timestamp(symbol, timeframe)) })
    }

    fn upsert_candles<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        candles: &'a [Candle],
    ) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move { self.append_candles(symbol, timeframe, candles) })
    }

    fn upsert_price<'a>(&'a self, tick: &'a PriceTick) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move { self.append_price(tick) })
    }

    fn timestamps_in_range<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> BoxFuture<'a, StoreResult<Vec<i64>>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .index
                .candles_in_range(symbol, timeframe, start, end)
                .into_iter()
                .map(|c| c.timestamp)
                .collect())
        })
    }

    fn candles_in_range<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> BoxFuture<'a, StoreResult<Vec<Candle>>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .index
                .candles_in_range(symbol, timeframe, start, end))
        })
    }

    fn latest_price<'a>(
        &'a self,
        symbol: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<PriceTick>>> {
        Box::pin(async move { Ok(self.state.lock().index.latest_price(symbol)) })
    }

    fn delete_older_than(&self, cutoff: i64) -> BoxFuture<'_, StoreResult<CleanupReport>> {
        Box::pin(async move { self.compact(cutoff) })
    }

    fn stats(&self) -> BoxFuture<'_, StoreResult<StoreStats>> {
        Box::pin(async move { Ok(self.state.lock().index.stats()) })
    }
}

impl Drop for JsonlStore {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Err(e) = state.candles.flush() {
            warn!(?e, "Failed to flush candles on drop");
        }
        if let Err(e) = state.prices.flush() {
            warn!(?e, "Failed to flush prices on drop");
        }
    }
}
