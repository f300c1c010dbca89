use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use staybook::auth::AuthContext;
use staybook::config::Config;
use staybook::engine::{Engine, EngineError, Entity, ErrorKind};
use staybook::model::{
    BlockedDate, Booking, BookingStatus, Id, NewProperty, Pagination, PricedProperty, Property,
    PropertyPatch, Role,
};
use staybook::repo::StorageError;
use staybook::store::WalStore;

#[derive(Parser)]
#[command(name = "staybook", version, about = "Availability and booking engine for short-term rentals")]
struct Cli {
    /// Acting user id.
    #[arg(long)]
    user: Option<Id>,

    /// Acting user role.
    #[arg(long, value_enum)]
    role: Option<RoleArg>,

    /// Directory holding the WAL. Overrides STAYBOOK_DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RoleArg {
    Owner,
    Traveler,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Owner => Role::Owner,
            RoleArg::Traveler => Role::Traveler,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Manage listings
    #[command(subcommand)]
    Property(PropertyCommands),
    /// Request a booking (traveler)
    Book {
        property_id: Id,
        start: String,
        end: String,
        #[arg(long, default_value_t = 1)]
        guests: u32,
    },
    /// Inspect bookings
    #[command(subcommand)]
    Booking(BookingCommands),
    /// Change a booking's status (owner)
    Status {
        booking_id: Id,
        /// PENDING, CONFIRMED or CANCELLED
        status: String,
    },
    /// Block a date range on a property (owner)
    Block {
        property_id: Id,
        start: String,
        end: String,
    },
    /// Remove a blocked range (owner)
    Unblock { blocked_date_id: Id },
    /// Find available properties
    Search {
        start: String,
        end: String,
        #[arg(long, default_value_t = 1)]
        guests: u32,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        page_size: Option<u32>,
    },
    /// Rewrite the WAL as a snapshot of current state
    Compact,
}

#[derive(Subcommand)]
enum PropertyCommands {
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        max_guests: u32,
        #[arg(long)]
        price: String,
    },
    Update {
        id: Id,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Remove the description
        #[arg(long, conflicts_with = "description")]
        clear_description: bool,
        #[arg(long)]
        max_guests: Option<u32>,
        #[arg(long)]
        price: Option<String>,
    },
    Delete { id: Id },
    Get { id: Id },
    /// List the caller's own properties
    Mine {
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        page_size: Option<u32>,
    },
}

#[derive(Subcommand)]
enum BookingCommands {
    Get { id: Id },
}

#[derive(Serialize)]
#[serde(untagged)]
enum Output {
    Property(Property),
    Properties(Vec<Property>),
    Booking(Booking),
    Blocked(BlockedDate),
    Search(Vec<PricedProperty>),
    Deleted { deleted: Id },
    Compacted { compacted: bool },
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::InvalidArgument | ErrorKind::InvalidDateRange => 2,
        ErrorKind::Unauthorized => 3,
        ErrorKind::Forbidden => 4,
        ErrorKind::NotFound => 5,
        ErrorKind::CapacityExceeded => 6,
        ErrorKind::DatesUnavailable => 7,
        ErrorKind::Conflict => 8,
        ErrorKind::InvalidStatusTransition => 9,
        ErrorKind::StorageError => 10,
    }
}

fn parse_price(value: &str) -> Result<Decimal, EngineError> {
    value
        .parse()
        .map_err(|_| EngineError::InvalidArgument(format!("invalid price: {value}")))
}

fn auth_context(cli: &Cli) -> AuthContext {
    match (cli.user, cli.role) {
        (Some(user_id), Some(role)) => AuthContext::user(user_id, role.into()),
        _ => AuthContext::anonymous(),
    }
}

async fn run(engine: &Engine, store: &WalStore, ctx: &AuthContext, command: Commands) -> Result<Output, EngineError> {
    let output = match command {
        Commands::Property(cmd) => match cmd {
            PropertyCommands::Create {
                title,
                description,
                max_guests,
                price,
            } => {
                let new = NewProperty {
                    title,
                    description,
                    max_guests,
                    base_price_per_night: parse_price(&price)?,
                };
                Output::Property(engine.create_property(ctx, new).await?)
            }
            PropertyCommands::Update {
                id,
                title,
                description,
                clear_description,
                max_guests,
                price,
            } => {
                let patch = PropertyPatch {
                    title,
                    description: if clear_description { Some(None) } else { description.map(Some) },
                    max_guests,
                    base_price_per_night: price.as_deref().map(parse_price).transpose()?,
                };
                Output::Property(engine.update_property(ctx, id, patch).await?)
            }
            PropertyCommands::Delete { id } => {
                engine.delete_property(ctx, id).await?;
                Output::Deleted { deleted: id }
            }
            PropertyCommands::Get { id } => match engine.get_property_by_id(id).await? {
                Some(property) => Output::Property(property),
                None => {
                    return Err(EngineError::NotFound {
                        entity: Entity::Property,
                        id,
                    });
                }
            },
            PropertyCommands::Mine { page, page_size } => {
                let pagination = Pagination::from_page(page, page_size)?;
                Output::Properties(engine.my_properties(ctx, pagination).await?)
            }
        },
        Commands::Book {
            property_id,
            start,
            end,
            guests,
        } => Output::Booking(engine.create_booking(ctx, property_id, &start, &end, guests).await?),
        Commands::Booking(BookingCommands::Get { id }) => Output::Booking(engine.get_booking(ctx, id).await?),
        Commands::Status { booking_id, status } => {
            let status: BookingStatus = status.parse()?;
            Output::Booking(engine.update_booking_status(ctx, booking_id, status).await?)
        }
        Commands::Block {
            property_id,
            start,
            end,
        } => Output::Blocked(engine.create_blocked_date(ctx, property_id, &start, &end).await?),
        Commands::Unblock { blocked_date_id } => {
            engine.delete_blocked_date(ctx, blocked_date_id).await?;
            Output::Deleted {
                deleted: blocked_date_id,
            }
        }
        Commands::Search {
            start,
            end,
            guests,
            page,
            page_size,
        } => {
            let pagination = Pagination::from_page(page, page_size)?;
            Output::Search(engine.search_available(&start, &end, guests, pagination).await?)
        }
        Commands::Compact => {
            store.compact().await?;
            Output::Compacted { compacted: true }
        }
    };
    Ok(output)
}

async fn execute(cli: Cli) -> Result<Output, EngineError> {
    let mut config = Config::from_env();
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    std::fs::create_dir_all(&config.data_dir).map_err(StorageError::from)?;

    let store = WalStore::open(config.wal_path(), config.store_options()).await?;
    info!(data_dir = %config.data_dir.display(), "store opened");
    let engine = Engine::with_store(Arc::clone(&store));

    let ctx = auth_context(&cli);
    let result = run(&engine, &store, &ctx, cli.command).await;
    store.close().await?;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    staybook::observability::init_tracing();
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to encode output: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            let kind = e.kind();
            let body = ErrorBody {
                error: kind.as_str(),
                message: e.to_string(),
            };
            match serde_json::to_string(&body) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("{}: {}", kind.as_str(), body.message),
            }
            ExitCode::from(exit_code(kind))
        }
    }
}
