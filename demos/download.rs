use footprint::{
    apis::{Api, Binance, Retry, RetryPolicy},
    export::CsvExport,
    AnyError, Footprint,
};

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .with_utc_timestamps()
        .init()
        .unwrap();

    let apis: Vec<Box<dyn Api>> = vec![Box::new(Retry::new(
        Binance::from_env()?,
        RetryPolicy::with_retries(3),
    ))];

    let report = Footprint::from_env()?
        .run(&apis, &CsvExport::new("./data"))
        .await?;

    if report.completed().count() == 0 {
        return Err("No pair completed.".into());
    }

    Ok(())
}
