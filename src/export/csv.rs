use super::{Batch, Export, ExportError};
use crate::Record;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Writes one CSV file per pair, named `<venue>_<symbol>_<interval>.csv`.
pub struct CsvExport {
    dir: PathBuf,
}

impl CsvExport {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        CsvExport {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self, batch: &Batch<'_>) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}.csv",
            batch.venue,
            batch.symbol.file_safe(),
            batch.interval
        ))
    }
}

// The file only appears under its final name once completely written.
fn write(path: &Path, records: &[Record]) -> Result<(), ExportError> {
    let temp = path.with_extension("csv.tmp");
    let result = write_all(&temp, records)
        .and_then(|()| std::fs::rename(&temp, path).map_err(ExportError::from));
    if result.is_err() {
        let _ = std::fs::remove_file(&temp);
    }
    result
}

fn write_all(path: &Path, records: &[Record]) -> Result<(), ExportError> {
    let mut writer = ::csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

#[async_trait]
impl Export for CsvExport {
    async fn export(&self, batch: Batch<'_>) -> Result<(), ExportError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(&batch);
        let records: Vec<Record> = batch.candles.iter().map(Record::from).collect();
        log::info!("Writing {} records to {}.", records.len(), path.display());

        let target = path.clone();
        tokio::task::spawn_blocking(move || write(&target, &records))
            .await
            .map_err(|err| ExportError::Task(err.to_string()))??;

        log::debug!("Wrote {}.", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Candle, EnrichedCandle, Interval, MarketType, Symbol, Venue, VolumeProfile};
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("footprint-{}", Uuid::new_v4()))
    }

    fn enriched(timestamp: i64) -> EnrichedCandle {
        EnrichedCandle {
            candle: Candle {
                timestamp,
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 4.0,
            },
            profile: VolumeProfile {
                bin_upper_bounds: vec![1.0, 2.0],
                buy_amounts: vec![1.0, 2.0],
                sell_amounts: vec![0.5, 0.0],
            },
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn writes_header_and_rows() {
        let dir = temp_dir();
        let export = CsvExport::new(&dir);
        let candles = vec![enriched(0), enriched(60_000)];
        let batch = Batch {
            run_id: Uuid::new_v4(),
            venue: Venue::new("binance"),
            symbol: Symbol::new("BTC/USDT:USDT", MarketType::Swap),
            interval: Interval::M3,
            candles: &candles,
        };

        export.export(batch).await.unwrap();

        let path = dir.join("binance_BTC_USDT_USDT_3m.csv");
        assert_eq!(export.path(&batch), path);
        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp,open,high,low,close,volume,bid_volume_sum,ask_volume_sum,delta")
        );

        let records: Vec<Record> = ::csv::Reader::from_path(&path)
            .unwrap()
            .deserialize()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].timestamp, 60_000);
        assert_eq!(records[1].bid_volume_sum, 0.5);
        assert_eq!(records[1].ask_volume_sum, 3.0);
        assert_eq!(records[1].delta, 2.5);
        assert!(!path.with_extension("csv.tmp").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failed_write_leaves_nothing_behind() {
        let dir = temp_dir();
        // The target directory does not exist, so neither file can be created.
        let path = dir.join("missing").join("out.csv");

        assert!(write(&path, &[enriched(0).record()]).is_err());
        assert!(!path.exists());
        assert!(!path.with_extension("csv.tmp").exists());
    }
}
