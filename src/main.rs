//! Command line entry point.
//!
//! `dictengine [CONFIG]` applies pending migrations and reports them,
//! `dictengine [CONFIG] translate <dict> <query>` prints what a query
//! becomes for each backend.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use dictengine::backend::embedded_registry;
use dictengine::engine::DictEngineUpdater;
use dictengine::migration::load_scripts;
use dictengine::query::{MongoTranslator, PostgresTranslator, compile};
use dictengine::{DictDataService, DictError, DictService, MigrationEngine, Result, Settings};

fn init_tracing(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .map_err(|e| DictError::Config(format!("Invalid log filter: {}", e)))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
    Ok(())
}

fn usage() -> DictError {
    DictError::Config("usage: dictengine [CONFIG] [translate <dict> <query>]".to_string())
}

fn run(args: &[String]) -> Result<()> {
    let (config_file, command) = match args.first() {
        Some(first) if first != "translate" => (Some(first.as_str()), &args[1..]),
        _ => (None, args),
    };
    let settings = Settings::load(config_file)?;
    init_tracing(&settings.log.filter)?;

    let registry = Arc::new(embedded_registry(&settings)?);
    registry.initialize()?;
    DictEngineUpdater::new(registry.clone()).setup_dict_engines_if_null()?;
    let dicts = Arc::new(DictService::new(registry.clone()));
    let data = Arc::new(DictDataService::new(dicts.clone()));

    let migrations = MigrationEngine::new(registry.clone(), dicts.clone(), data);
    let scripts = load_scripts(&settings.migrations.path, &settings.migrations.target)?;
    let applied = migrations.migrate(scripts)?;
    for row in &applied {
        println!("applied {} {} ({})", row.target, row.version, row.script);
    }
    info!(applied = applied.len(), "migrations complete");

    match command {
        [] => Ok(()),
        [verb, dict_id, query] if verb == "translate" => {
            let dict = dicts.get_by_id(dict_id)?;
            let catalog = dicts.catalog(&dict)?;
            let sql = compile(&PostgresTranslator, query, &dict.id, &catalog)?;
            println!("postgres: {}", sql.sql);
            for (name, value) in &sql.params {
                println!("  :{} = {:?}", name, value);
            }
            let filter = compile(&MongoTranslator, query, &dict.id, &catalog)?;
            println!("mongo: {}", filter.document);
            Ok(())
        }
        _ => Err(usage()),
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "dictengine failed");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
