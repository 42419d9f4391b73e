//! ldstore CLI
//!
//! Command-line interface for inspecting and editing a Redis data store.
//! Items are read and written in the envelope format (`EnvelopeKind`).

use clap::{Parser, Subcommand};
use ld_redis_store::{
    BigSegmentStore, Config, EnvelopeKind, PersistentDataStore, Result, SerializedItem,
};
use tracing_subscriber::{fmt, EnvFilter};

/// ldstore CLI
#[derive(Parser, Debug)]
#[command(name = "ldstore-cli")]
#[command(about = "CLI for a Redis-backed versioned data store")]
#[command(version)]
struct Args {
    /// Server address (host:port); repeat for a cluster
    #[arg(short, long)]
    address: Vec<String>,

    /// Server URL (redis:// or rediss://), instead of addresses
    #[arg(short, long, conflicts_with = "address")]
    url: Option<String>,

    /// Key prefix
    #[arg(short, long, default_value = ld_redis_store::keys::DEFAULT_PREFIX)]
    prefix: String,

    /// ACL username (with --address)
    #[arg(long)]
    username: Option<String>,

    /// Password (with --address)
    #[arg(long)]
    password: Option<String>,

    /// Logical database (with --address)
    #[arg(long, default_value = "0")]
    db: i64,

    /// Socket timeout in milliseconds (0 = none)
    #[arg(short, long, default_value = "5000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the server answers
    Ping,

    /// Report whether the store has been initialized
    Inited,

    /// Get one item
    Get {
        /// Kind name
        kind: String,

        /// Item key
        key: String,
    },

    /// List every item of a kind
    GetAll {
        /// Kind name
        kind: String,
    },

    /// Write an item if its version is newer
    Upsert {
        /// Kind name
        kind: String,

        /// Item key
        key: String,

        /// Item version
        version: u64,

        /// Item body
        body: String,
    },

    /// Write a deletion marker if its version is newer
    Delete {
        /// Kind name
        kind: String,

        /// Item key
        key: String,

        /// Deletion version
        version: u64,
    },

    /// Show the big segment sync time
    Metadata,

    /// Show big segment membership for a user hash
    Membership {
        /// Hashed user key
        user_hash: String,

        /// Segment refs to check
        segments: Vec<String>,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,ld_redis_store=info"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut builder = Config::builder()
        .prefix(args.prefix.as_str())
        .check_on_startup(false)
        .connect_timeout_ms(args.timeout_ms)
        .read_timeout_ms(args.timeout_ms)
        .write_timeout_ms(args.timeout_ms)
        .db(args.db);

    if let Some(username) = args.username {
        builder = builder.username(username);
    }
    if let Some(password) = args.password {
        builder = builder.password(password);
    }

    builder = match args.url {
        Some(url) => builder.url(url),
        None => builder.addresses(args.address),
    };
    let config = builder.build();

    match args.command {
        Commands::Metadata => {
            let store = config.create_big_segment_store()?;
            tracing::debug!("Using Redis at {}", store.backend().endpoint());
            let metadata = store.get_metadata()?;
            println!("last synchronized: {} ms", metadata.last_up_to_date);
            store.close()
        }
        Commands::Membership {
            user_hash,
            segments,
        } => {
            let store = config.create_big_segment_store()?;
            let membership = store.get_user_membership(&user_hash)?;
            for segment in &segments {
                let state = match membership.check(segment) {
                    Some(true) => "included",
                    Some(false) => "excluded",
                    None => "unspecified",
                };
                println!("{}: {}", segment, state);
            }
            if segments.is_empty() {
                println!("{} segment refs recorded", membership.len());
            }
            store.close()
        }
        command => {
            let store = config.create_data_store()?;
            tracing::debug!("Using Redis at {}", store.backend().endpoint());
            run_data_command(&store, command)?;
            store.close()
        }
    }
}

fn run_data_command(store: &dyn PersistentDataStore, command: Commands) -> Result<()> {
    match command {
        Commands::Ping => {
            let state = if store.is_available() { "PONG" } else { "unavailable" };
            println!("{}", state);
        }
        Commands::Inited => {
            println!("{}", store.is_initialized());
        }
        Commands::Get { kind, key } => {
            let kind = EnvelopeKind::new(kind);
            match store.get(&kind, &key)? {
                Some(item) => print_item(&kind, &key, &item)?,
                None => println!("(not found)"),
            }
        }
        Commands::GetAll { kind } => {
            let kind = EnvelopeKind::new(kind);
            let mut items = store.get_all(&kind)?;
            items.sort_by(|a, b| a.0.cmp(&b.0));
            for (key, item) in &items {
                print_item(&kind, key, item)?;
            }
        }
        Commands::Upsert {
            kind,
            key,
            version,
            body,
        } => {
            let kind = EnvelopeKind::new(kind);
            let item = kind.item(version, body.into_bytes())?;
            report_upsert(store.upsert(&kind, &key, &item)?);
        }
        Commands::Delete { kind, key, version } => {
            let kind = EnvelopeKind::new(kind);
            let item = kind.tombstone(version)?;
            report_upsert(store.upsert(&kind, &key, &item)?);
        }
        Commands::Metadata | Commands::Membership { .. } => {}
    }
    Ok(())
}

fn print_item(kind: &EnvelopeKind, key: &str, item: &SerializedItem) -> Result<()> {
    let envelope = kind.decode(&item.payload)?;
    if envelope.deleted {
        println!("{} v{} (deleted)", key, envelope.version);
    } else {
        println!(
            "{} v{} {}",
            key,
            envelope.version,
            String::from_utf8_lossy(&envelope.body)
        );
    }
    Ok(())
}

fn report_upsert(applied: bool) {
    if applied {
        println!("applied");
    } else {
        println!("superseded (stored version is the same or newer)");
    }
}
