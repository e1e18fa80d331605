use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use backend::{
    cache::ListingCache,
    cli::{Cli, Command},
    config::AppConfig,
    db::Db,
    service::DispatchService,
};
use common::logger::init_logger;
use dispatch::response::DispatchResponse;
use records::pg::PgRecordStore;

fn print_response(resp: &DispatchResponse) -> anyhow::Result<ExitCode> {
    println!("{}", resp.to_json()?);
    Ok(if resp.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = AppConfig::from_env()?;

    init_logger("logistima", cfg.json_logs);
    tracing::info!(command = ?cli.command, "starting logistima dispatch");

    let db = Db::connect(&cfg).await?;

    if let Command::Migrate = cli.command {
        db.migrate().await?;
        tracing::info!("schema migrated");
        return Ok(ExitCode::SUCCESS);
    }

    let store = Arc::new(PgRecordStore::new(db.pool.clone(), cfg.store_config()));
    let cache = Arc::new(ListingCache::new(cfg.listing_cache_ttl));
    let service = DispatchService::new(store, cache);

    let code = match cli.command {
        Command::Migrate => Ok(ExitCode::SUCCESS),
        Command::Assign { package, deliverer } => {
            print_response(&service.assign(package, deliverer).await)
        }
        Command::AutoAssign { package } => print_response(&service.auto_assign(package).await),
        Command::Best { zone } => match service.best(zone).await {
            Ok(best) => {
                println!("{}", serde_json::to_string_pretty(&best)?);
                Ok(if best.is_some() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                })
            }
            Err(err) => print_response(&DispatchResponse::failed(&err)),
        },
        Command::Deliverers { zone } => {
            let listing = service.zone_deliverers(zone).await?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
            Ok(ExitCode::SUCCESS)
        }
    }?;

    let counters = service.engine().counters().snapshot();
    tracing::info!(?counters, "dispatch counters");
    Ok(code)
}
