use chrono::NaiveDate;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use irrigo::detector::detect_events;
use irrigo::extract::extract_series;

/// Run the extraction and detection pipeline over a payload captured
/// from the dashboard API, without a browser.
#[derive(Parser, Debug)]
#[command(name = "irrigo-detect", version)]
struct Args {
    /// JSON payload file as intercepted from the site.
    file: std::path::PathBuf,

    /// Date the series belongs to; defaults to today. Only matters for
    /// payloads without their own timestamps.
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Farm id to stamp on the series.
    #[arg(long, default_value = "offline")]
    farm: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("irrigo=info")),
        )
        .init();

    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.file)?;
    let payload: serde_json::Value = serde_json::from_str(&raw)?;
    let date = args.date.unwrap_or_else(|| chrono::Local::now().date_naive());

    let series = extract_series(&payload, &args.farm, date)?;
    println!(
        "{}: {} point(s), y-range {:.3}",
        args.file.display(),
        series.len(),
        series.y_range()
    );

    let detection = detect_events(&series);
    if detection.is_empty() {
        println!("no irrigation events");
        return Ok(());
    }
    for (i, event) in detection.events.iter().enumerate() {
        println!(
            "event {}: valley #{} {} -> peak #{} {}, rise {:.3}",
            i + 1,
            event.valley_index,
            event.valley_time.format("%H:%M"),
            event.peak_index,
            event.peak_time.format("%H:%M"),
            event.rise
        );
    }
    Ok(())
}
