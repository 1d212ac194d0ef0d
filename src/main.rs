use listing_ingest::client::SearchClient;
use listing_ingest::config::Config;
use listing_ingest::db::connection::Database;
use listing_ingest::services::pipeline::{Pipeline, RunSettings};
use listing_ingest::services::store::PgStore;
use log::{error, info};
use std::path::PathBuf;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (source={}, payload={}, max_pages={}, page_delay={}s, max_fetch_retries={}, fetch_backoff={}s, request_timeout={}s)",
        cfg.source_url,
        cfg.search_payload_file.display(),
        cfg.max_pages.get(),
        cfg.page_delay.as_secs(),
        cfg.max_fetch_retries.get(),
        cfg.fetch_backoff.as_secs(),
        cfg.request_timeout.as_secs()
    );

    // 2) Apply pending database migrations
    let db = Database::new(cfg.database_url.clone());
    if cfg.run_migrations {
        db.run_migrations()?;
    } else {
        info!("Database migrations disabled via RUN_MIGRATIONS");
    }

    // 3) Init search client
    let source = SearchClient::from_config(&cfg).map_err(|e| format!("search client setup failed: {}", e))?;

    // 4) Ingest pages
    let store = PgStore::new(db);
    let summary = Pipeline::new(&source, &store, RunSettings::from_config(&cfg))
        .run()
        .map_err(|e| e.to_string())?;

    info!(
        "Ingestion complete: pages={}, records={}, rejected={}, inserted={}, already_present={}, failed={}, addresses={} ({} failed), images={} ({} failed)",
        summary.pages,
        summary.records_seen,
        summary.rejected,
        summary.inserted,
        summary.already_present,
        summary.record_failures,
        summary.addresses_written,
        summary.address_failures,
        summary.images_written,
        summary.image_failures
    );
    Ok(())
}

fn configure_env_from_cli() -> Result<Option<LoadedEnvFile>, String> {
    let env_file = parse_env_file_arg(std::env::args_os().skip(1))?;

    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        // Values already present in the process environment win.
        dotenvy::from_path(&path).map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
        Ok(Some(LoadedEnvFile { path, explicit: true }))
    } else {
        match dotenvy::dotenv() {
            Ok(path) => Ok(Some(LoadedEnvFile { path, explicit: false })),
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(format!("failed to load .env: {}", e)),
        }
    }
}

fn parse_env_file_arg<I>(args: I) -> Result<Option<PathBuf>, String>
where
    I: IntoIterator<Item = std::ffi::OsString>,
{
    let mut args = args.into_iter();
    let mut env_file: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path_str));
            }
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }
    Ok(env_file)
}

fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "listing-ingest {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
