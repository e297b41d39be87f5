use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use gravekeeper::codec::decode_entries;
use gravekeeper::storage::DurabilityMode;
use gravekeeper::{
    FileStore, FileStoreConfig, Millis, OwnerId, RecordId, TombstoneRecord, TombstoneStore,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "grave-tool")]
#[command(about = "Offline administration of a gravekeeper file store")]
struct Cli {
    /// Directory holding the store's WAL and snapshot
    #[arg(long, default_value = "./graves")]
    data_dir: PathBuf,

    #[arg(long, default_value = "")]
    prefix: String,

    /// Print records as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    List {
        #[arg(long)]
        owner: Option<String>,
    },
    Show {
        id: i64,
    },
    PurgeExpired {
        /// Reference time in epoch milliseconds; defaults to now
        #[arg(long)]
        now: Option<Millis>,
    },
    Delete {
        id: i64,
    },
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = FileStoreConfig::new(&cli.data_dir)
        .durability(DurabilityMode::Sync)
        .table_prefix(&cli.prefix);
    let store = FileStore::new(config).context("Invalid store configuration")?;
    store
        .initialize()
        .await
        .with_context(|| format!("Failed to open store at '{}'", cli.data_dir.display()))?;

    let outcome = run(&store, cli.command, cli.json).await;
    store.close().await.context("Failed to close store")?;
    outcome
}

async fn run(store: &FileStore, command: Command, json: bool) -> Result<()> {
    match command {
        Command::List { owner } => {
            let records = match owner {
                Some(owner) => {
                    let owner = OwnerId::parse(&owner)
                        .ok_or_else(|| anyhow!("Invalid owner id '{}'", owner))?;
                    store.list_by_owner(owner).await?
                }
                None => store.list_all().await?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    print_record(record);
                }
                println!("{} tombstone(s)", records.len());
            }
            Ok(())
        }
        Command::Show { id } => {
            let id = RecordId(id);
            let record = store
                .get(id)
                .await?
                .ok_or_else(|| anyhow!("Tombstone {} not found", id))?;
            let items = decode_entries(&store.load_items(id).await?);
            if json {
                let value = serde_json::json!({ "record": record, "items": items });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print_record(&record);
                for entry in &items {
                    println!(
                        "  slot {:>3}: {} x{}",
                        entry.slot_index, entry.item.material, entry.item.amount
                    );
                }
            }
            Ok(())
        }
        Command::PurgeExpired { now } => {
            let now = now.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
            let deleted = store.delete_expired(now).await?;
            println!("Purged {} expired tombstone(s)", deleted.len());
            Ok(())
        }
        Command::Delete { id } => {
            let id = RecordId(id);
            if store.delete(id).await? {
                println!("Deleted tombstone {}", id);
                Ok(())
            } else {
                Err(anyhow!("Tombstone {} not found", id))
            }
        }
        Command::Stats => {
            let stats = store.stats().await?;
            println!("Records:     {}", stats.records);
            println!("Items:       {}", stats.items);
            println!("WAL entries: {}", stats.wal_entries);
            Ok(())
        }
    }
}

fn print_record(record: &TombstoneRecord) {
    println!(
        "{} owner={} at {} died={} protected_until={} despawn={} xp={}",
        record.id,
        record.owner,
        record.position,
        format_millis(record.death_time),
        format_millis(record.protection_expire),
        format_millis(record.despawn_time),
        record.experience
    );
}

fn format_millis(millis: Millis) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}
