use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use green_score::adapters::houston_zips::HoustonZipSource;
use green_score::app::prewarm::{write_log, PrewarmRunner};
use green_score::config::PrewarmArgs;
use green_score::utils::logger;
use reqwest::Client;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = PrewarmArgs::parse();

    // 初始化日誌
    logger::init_cli_logger(args.verbose);

    let client = Client::builder()
        .user_agent("green-score-prewarm")
        .timeout(Duration::from_secs(120))
        .build()
        .context("failed to build HTTP client")?;

    let mut zips = HoustonZipSource::new(client.clone(), args.zips_url.clone())
        .discover(args.include_po_boxes)
        .await;
    if args.limit > 0 {
        zips.truncate(args.limit);
    }

    let started = Utc::now();
    println!("Discovered {} Houston ZIPs", zips.len());
    println!(
        "Prewarming against {} with rpm={}, concurrency={}, dry_run={}",
        args.base_url, args.rpm, args.concurrency, args.dry_run
    );

    let runner = PrewarmRunner::new(
        client,
        &args.base_url,
        args.rpm as usize,
        args.concurrency as usize,
    );
    let records = runner.run(&zips, args.dry_run).await;

    let finished = Utc::now();
    let path = match write_log(&args.output_dir, &records, finished) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("❌ Failed to write prewarm log: {}", e);
            std::process::exit(1);
        }
    };

    let ok_count = records.iter().filter(|r| r.ok).count();
    println!(
        "\n✅ Done. {}/{} successful. Log: {}",
        ok_count,
        records.len(),
        path.display()
    );
    println!(
        "Started: {}  Finished: {}",
        started.to_rfc3339(),
        finished.to_rfc3339()
    );

    Ok(())
}
