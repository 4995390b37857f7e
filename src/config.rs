pub use config::Config;
pub use once_cell::sync::OnceCell;
use std::error::Error;

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

/// First block at which BRC-20 operations are recognized.
pub const BRC20_GENESIS_BLOCK: u64 = 779_832;

/// First block at which 5-byte self-mint tickers are valid.
pub const BRC20_SELF_MINT_ACTIVATION_BLOCK: u64 = 837_090;

pub fn init_global_config(path: &str) -> Result<(), Box<dyn Error>> {
    let config = Config::builder()
        .add_source(config::File::with_name(path))
        .build()?;
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| "Config already set")?;
    Ok(())
}

pub fn get_global_config() -> &'static Config {
    GLOBAL_CONFIG.get().unwrap_or_else(|| {
        eprintln!("FATAL: Config not initialized - call init_global_config() first");
        std::process::exit(1);
    })
}

/// Get db_path from config
pub fn get_db_path(config: &Config) -> Result<String, Box<dyn Error>> {
    config
        .get_string("paths.db_path")
        .map_err(|e| format!("Missing paths.db_path in config: {}", e).into())
}

/// Path of the JSONL block-directive stream consumed by the ingest service.
pub fn get_event_log_path(config: &Config) -> Result<String, Box<dyn Error>> {
    config
        .get_string("paths.event_log")
        .map_err(|e| format!("Missing paths.event_log in config: {}", e).into())
}

/// Version string surfaced by the status endpoint.
pub fn get_server_version(config: &Config) -> String {
    config
        .get_string("server.version")
        .unwrap_or_else(|_| format!("ordblox/{}", env!("CARGO_PKG_VERSION")))
}

pub fn get_server_bind(config: &Config) -> (String, u16) {
    let host = config
        .get_string("server.host")
        .unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = config.get_int("server.port").unwrap_or(3005) as u16;
    (host, port)
}

pub fn get_brc20_genesis_block(config: &Config) -> u64 {
    config
        .get_int("brc20.genesis_block")
        .map(|v| v as u64)
        .unwrap_or(BRC20_GENESIS_BLOCK)
}

pub fn get_brc20_self_mint_activation_block(config: &Config) -> u64 {
    config
        .get_int("brc20.self_mint_activation_block")
        .map(|v| v as u64)
        .unwrap_or(BRC20_SELF_MINT_ACTIVATION_BLOCK)
}

/// Bounded retry policy for storage I/O at the block boundary.
pub fn get_io_retry(config: &Config) -> (u32, u64) {
    let limit = config.get_int("ingest.io_retry_limit").unwrap_or(5) as u32;
    let base_ms = config.get_int("ingest.io_retry_base_ms").unwrap_or(500) as u64;
    (limit, base_ms)
}
