use super::{Batch, Export, ExportError};
use crate::Record;

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    ConnectOptions, SqlitePool,
};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

const CANDLE_COLUMNS: [&str; 13] = [
    "run_id",
    "venue",
    "symbol",
    "interval",
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "bid_volume_sum",
    "ask_volume_sum",
    "delta",
];

const BIN_COLUMNS: [&str; 9] = [
    "run_id",
    "venue",
    "symbol",
    "interval",
    "timestamp",
    "bin",
    "upper_bound",
    "buy_amount",
    "sell_amount",
];

// Rows per INSERT, keeps the bound variables below SQLite's limit of 999.
const CHUNK_SIZE: usize = 50;

/// The Store export writes records and volume profiles into a SQLite
/// database, every pair in its own transaction.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, ExportError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        options.disable_statement_logging();

        let pool = SqlitePool::connect_with(options).await?;
        Store::with_pool(pool).await
    }

    pub async fn in_memory() -> Result<Self, ExportError> {
        let mut options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        options.disable_statement_logging();

        // Every connection would get its own empty in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Store::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, ExportError> {
        sqlx::query(
            "
                CREATE TABLE IF NOT EXISTS candles (
                    run_id TEXT,
                    venue TEXT,
                    symbol TEXT,
                    interval TEXT,
                    timestamp INTEGER,
                    open REAL,
                    high REAL,
                    low REAL,
                    close REAL,
                    volume REAL,
                    bid_volume_sum REAL,
                    ask_volume_sum REAL,
                    delta REAL,
                    PRIMARY KEY(run_id, venue, symbol, interval, timestamp)
                )
            ",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "
                CREATE TABLE IF NOT EXISTS bins (
                    run_id TEXT,
                    venue TEXT,
                    symbol TEXT,
                    interval TEXT,
                    timestamp INTEGER,
                    bin INTEGER,
                    upper_bound REAL,
                    buy_amount REAL,
                    sell_amount REAL,
                    PRIMARY KEY(run_id, venue, symbol, interval, timestamp, bin)
                )
            ",
        )
        .execute(&pool)
        .await?;

        Ok(Store { pool })
    }

    /// Number of candle rows and bin rows stored for a run.
    pub async fn count(&self, run_id: Uuid) -> Result<(i64, i64), ExportError> {
        let (candles,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM candles WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        let (bins,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bins WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok((candles, bins))
    }
}

fn insert_statement(table: &str, columns: &[&str], rows: usize) -> String {
    let row = format!("({})", vec!["?"; columns.len()].join(","));
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        columns.join(", "),
        vec![row; rows].join(",")
    )
}

// One row per bin of every candle.
struct Bin {
    timestamp: i64,
    bin: i64,
    upper_bound: f64,
    buy_amount: f64,
    sell_amount: f64,
}

#[async_trait]
impl Export for Store {
    async fn export(&self, batch: Batch<'_>) -> Result<(), ExportError> {
        let run_id = batch.run_id.to_string();
        let venue = batch.venue.as_str();
        let symbol = batch.symbol.name();
        let interval = batch.interval.as_str();

        let records: Vec<Record> = batch.candles.iter().map(Record::from).collect();
        let bins: Vec<Bin> = batch
            .candles
            .iter()
            .flat_map(|enriched| {
                let profile = &enriched.profile;
                (0..profile.bin_count()).map(move |i| Bin {
                    timestamp: enriched.candle.timestamp,
                    bin: i as i64,
                    upper_bound: profile.bin_upper_bounds[i],
                    buy_amount: profile.buy_amounts[i],
                    sell_amount: profile.sell_amounts[i],
                })
            })
            .collect();

        log::info!(
            "Storing {} records and {} bins of {} on {}.",
            records.len(),
            bins.len(),
            symbol,
            venue
        );

        // Dropping the transaction without committing rolls it back.
        let mut tx = self.pool.begin().await?;

        for chunk in records.chunks(CHUNK_SIZE) {
            let query_string = insert_statement("candles", &CANDLE_COLUMNS, chunk.len());
            let mut query = sqlx::query(&query_string);
            for record in chunk {
                query = query
                    .bind(run_id.as_str())
                    .bind(venue)
                    .bind(symbol)
                    .bind(interval)
                    .bind(record.timestamp)
                    .bind(record.open)
                    .bind(record.high)
                    .bind(record.low)
                    .bind(record.close)
                    .bind(record.volume)
                    .bind(record.bid_volume_sum)
                    .bind(record.ask_volume_sum)
                    .bind(record.delta);
            }
            query.execute(&mut tx).await?;
        }

        for chunk in bins.chunks(CHUNK_SIZE) {
            let query_string = insert_statement("bins", &BIN_COLUMNS, chunk.len());
            let mut query = sqlx::query(&query_string);
            for bin in chunk {
                query = query
                    .bind(run_id.as_str())
                    .bind(venue)
                    .bind(symbol)
                    .bind(interval)
                    .bind(bin.timestamp)
                    .bind(bin.bin)
                    .bind(bin.upper_bound)
                    .bind(bin.buy_amount)
                    .bind(bin.sell_amount);
            }
            query.execute(&mut tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
