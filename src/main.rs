use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use pow_ledger::api::{self, handlers};
use pow_ledger::blockchain::{self, Blockchain};
use pow_ledger::config::Config;

#[derive(Parser, Debug)]
#[command(name = "pow_ledger", about = "Single-node proof-of-work ledger with a REST API")]
struct Args {
    /// TOML configuration file; defaults apply when it is absent
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Port to listen on, overrides the config file
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory of the sled database, overrides the config file
    #[arg(long)]
    data_dir: Option<String>,

    /// Keep the ledger in memory only
    #[arg(long)]
    in_memory: bool,
}

fn initialize_blockchain(config: &Config) -> anyhow::Result<Blockchain> {
    if config.storage.in_memory {
        info!("Using in-memory ledger, nothing will be persisted");
        return Ok(Blockchain::in_memory(config.ledger)?);
    }

    let data_dir = &config.storage.path;
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        warn!("Failed to create data directory {}: {}", data_dir, e);
    }

    match Blockchain::with_storage(data_dir, config.ledger) {
        Ok(blockchain) => {
            info!(
                "Loaded ledger from {} at height {}",
                data_dir,
                blockchain.get_latest_block().index
            );
            Ok(blockchain)
        }
        Err(err) => {
            warn!("Failed to open ledger storage at {}: {}", data_dir, err);
            warn!("Creating in-memory ledger instead");
            Ok(Blockchain::in_memory(config.ledger)?)
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_chain,
        handlers::validate_chain,
        handlers::get_pending_transactions,
        handlers::new_transaction,
        handlers::get_transaction,
        handlers::mine_block,
        handlers::get_mining_reward,
        handlers::get_difficulty,
        handlers::set_difficulty,
        handlers::create_wallet,
        handlers::get_wallet_balance,
        handlers::get_wallet_history,
        handlers::get_all_accounts
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::TransactionKind,
            blockchain::MarkerData,
            blockchain::Address,
            blockchain::DigitalSignature,
            blockchain::Account,
            blockchain::HistoryEntry,
            blockchain::TransactionRecord,
            blockchain::ChainViolation,
            handlers::ChainResponse,
            handlers::ValidationResponse,
            handlers::TransactionRequest,
            handlers::TransactionResponse,
            handlers::MineRequest,
            handlers::MineResponse,
            handlers::DifficultyRequest,
            handlers::WalletResponse,
            handlers::BalanceResponse,
            handlers::HistoryResponse
        )
    ),
    tags(
        (name = "ledger", description = "Proof-of-work ledger endpoints")
    ),
    info(
        title = "PoW Ledger API",
        version = "1.0.0",
        description = "Submit signed transfers, mine blocks and query balances",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.path = data_dir;
    }
    if args.in_memory {
        config.storage.in_memory = true;
    }
    config.validate()?;

    let blockchain = web::Data::new(initialize_blockchain(&config)?);
    info!(
        "Difficulty {}, mining reward {}",
        blockchain.get_difficulty(),
        blockchain.mining_reward()
    );

    let bind = (config.server.host.clone(), config.server.port);
    info!("Starting HTTP server at http://{}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(blockchain.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi()),
            )
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
