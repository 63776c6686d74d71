use std::collections::HashSet;
use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use alloy_primitives::Address;
use balance_report::net::rpc::RpcClient;
use balance_report::output::{ReportFormat, write_report};
use balance_report::report::{ReportConfig, TimelineReporter, report_window};
use balance_report::store::{RecordStore, file::FileStore};
use block_locator::{BlockLocator, DEFAULT_MAX_PROBES, LocatorConfig, Record};
use chrono::{FixedOffset, NaiveDate};
use clap::{Args as ClapArgs, Parser, Subcommand};
use colored::*;
use figlet_rs::FIGfont;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_banner() {
    let Ok(font) = FIGfont::standard() else {
        return;
    };
    let Some(figure) = font.convert("Balance Report") else {
        return;
    };

    println!("{}", "═══════════════════════════════════════════════════════════════════════════════".bright_magenta());
    println!("{}", figure.to_string().bright_cyan().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════════════════════".bright_magenta());
    println!("{}", "Daily Ethereum balance changes, block by block".bright_yellow());
    println!("{}", "═══════════════════════════════════════════════════════════════════════════════".bright_magenta());
    println!();
}

#[derive(Parser, Debug)]
#[command(name = "balance-report")]
#[command(about = "Daily balance changes for Ethereum accounts", long_about = None)]
struct Args {
    /// Do not print the start banner
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a daily balance report for one or more addresses
    Report(ReportArgs),
    /// Print the first block at or after an RFC 3339 date
    Locate { date: String },
    /// Print the timestamp of a block as RFC 3339
    Date { number: u64 },
}

#[derive(ClapArgs, Debug)]
struct ReportArgs {
    /// First reported day (YYYY-MM-DD); the day before it seeds opening balances
    #[arg(long)]
    start: NaiveDate,

    /// Last reported day (YYYY-MM-DD), inclusive
    #[arg(long)]
    end: NaiveDate,

    /// Account to include; repeat for several
    #[arg(long = "address", required = true)]
    addresses: Vec<Address>,

    #[arg(short, long, default_value = "balance_report.csv")]
    output: PathBuf,

    /// csv or jsonl
    #[arg(long, default_value_t = ReportFormat::Csv)]
    format: ReportFormat,

    /// Hours east of UTC that days are counted in
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    utc_offset_hours: i32,

    /// JSONL file of block timestamps reused across runs
    #[arg(long, default_value = "./data/blocks.jsonl")]
    cache: PathBuf,

    /// Neither read nor update the block cache
    #[arg(long)]
    no_cache: bool,

    #[arg(long, default_value_t = DEFAULT_MAX_PROBES)]
    max_probes: usize,
}

async fn run_report(client: &RpcClient, args: ReportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let offset = FixedOffset::east_opt(args.utc_offset_hours * 3600)
        .ok_or("--utc-offset-hours must be between -23 and 23")?;
    let (start, end) = report_window(args.start, args.end, offset)?;

    let mut locator = BlockLocator::with_config(
        client,
        LocatorConfig {
            max_probes: args.max_probes,
        },
    );

    let store = if args.no_cache {
        None
    } else {
        Some(FileStore::new(&args.cache)?)
    };
    let mut known: HashSet<u64> = HashSet::new();
    if let Some(store) = &store {
        let records = store.all()?;
        info!(
            records = records.len(),
            tip = ?store.tip()?,
            path = %store.path().display(),
            "Loaded block cache"
        );
        known.extend(records.iter().map(|r| r.number));
        locator.preload(records);
    }

    let config = ReportConfig {
        utc_offset: offset,
        ..ReportConfig::default()
    };
    let mut reporter = TimelineReporter::with_config(locator, client, config);
    let result = reporter.generate_report(start, end, &args.addresses).await;

    // Blocks fetched before a failure are still worth keeping.
    if let Some(store) = &store {
        let fresh: Vec<Record> = reporter
            .locator()
            .cached_records()
            .into_iter()
            .filter(|r| !known.contains(&r.number))
            .collect();
        store.put_many(&fresh)?;
        info!(records = fresh.len(), "Block cache updated");
    }

    let rows = result?;
    let mut writer = BufWriter::new(File::create(&args.output)?);
    write_report(&mut writer, &rows, args.format)?;
    writer.flush()?;

    println!(
        "{} {} rows written to {}",
        "✓".bright_green().bold(),
        rows.len(),
        args.output.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if !args.quiet {
        print_banner();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("reqwest=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("hyper_util=warn".parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let url = env::var("ETH_RPC_URL").map_err(|_| "ETH_RPC_URL must be set")?;
    let client = RpcClient::new(&url)?;
    let head = client.get_block_number().await?;
    info!(head, "Connected to node");

    match args.command {
        Command::Report(report) => run_report(&client, report).await?,
        Command::Locate { date } => {
            let mut locator = BlockLocator::new(&client);
            let number = locator.resolve_date(&date).await?;
            println!("{number}");
        }
        Command::Date { number } => {
            let mut locator = BlockLocator::new(&client);
            let date = locator.block_date(number).await?;
            println!("{}", date.to_rfc3339());
        }
    }

    Ok(())
}
