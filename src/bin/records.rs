use camwatch::db::Db;
use camwatch::store::{RecordStore, SqliteRecordStore};
use camwatch::Config;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "records")]
#[command(about = "Show recent upload records")]
struct Args {
    /// Number of records to show
    #[arg(short, long, default_value = "20")]
    limit: usize,

    /// Show a single file by name
    #[arg(long)]
    name: Option<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let config = Config::load()?;
    let store = SqliteRecordStore::open(Db::new(config.db_path())).await?;

    let records = match &args.name {
        Some(name) => store.find(name).await?.into_iter().collect(),
        None => store.list_recent(args.limit).await?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No upload records found.");
        return Ok(());
    }

    println!("\n=== Upload Records ({}) ===\n", config.db_path().display());
    println!("{:-<100}", "");
    println!("{:<32} {:<10} {:<26} {}", "File", "Status", "Uploaded at", "Destination");
    println!("{:-<100}", "");
    for record in &records {
        println!(
            "{:<32} {:<10} {:<26} {}",
            record.file_name,
            record.status,
            record.uploaded_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.destination
        );
    }
    println!("{:-<100}", "");
    println!("{} record(s)\n", records.len());

    Ok(())
}
