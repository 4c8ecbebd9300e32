use ledger_state_sync::acs::{
	AcsCacheManager, AcsConfig, AcsError, AcsKey, CacheConfig, FileStateStore,
};
use ledger_state_sync::ledger::{GatewayError, JsonLedgerClient, Offset};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
	#[error("Missing environment variable {0}")]
	MissingEnv(&'static str),

	#[error("Invalid ACS_OFFSET: {0}")]
	InvalidOffset(#[from] std::num::ParseIntError),

	#[error("Ledger error: {0}")]
	Gateway(#[from] GatewayError),

	#[error("ACS error: {0}")]
	Acs(#[from] AcsError),
}

fn required(name: &'static str) -> Result<String, CliError> {
	env::var(name).map_err(|_| CliError::MissingEnv(name))
}

fn optional(name: &str) -> Option<String> {
	env::var(name).ok().filter(|v| !v.is_empty())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new("info,ledger_state_sync=debug")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	if let Err(e) = run().await {
		error!("{}", e);
		std::process::exit(1);
	}
}

async fn run() -> Result<(), CliError> {
	let api_url = required("LEDGER_API_URL")?;
	let offset: Offset = required("ACS_OFFSET")?.parse()?;
	let party = optional("PARTY_ID");
	let key = AcsKey::new(
		party.as_deref(),
		optional("TEMPLATE_ID").as_deref(),
		optional("INTERFACE_ID").as_deref(),
	)?;

	let client = JsonLedgerClient::new(api_url, optional("LEDGER_WS_URL"), optional("LEDGER_TOKEN"))?;
	info!("Created ledger client");

	let data_dir = optional("ACS_DATA_DIR").map(PathBuf::from);
	let cache_config = CacheConfig {
		enable_persistence: data_dir.is_some(),
		..CacheConfig::default()
	};
	let mut manager = AcsCacheManager::new(Arc::new(client), cache_config, AcsConfig::default());
	if let Some(data_dir) = data_dir {
		info!("Persisting ACS state under {:?}", data_dir);
		manager = manager.with_store(Arc::new(FileStateStore::new(data_dir)));
	}

	let contracts = manager.active_contracts(&key, offset).await?;
	info!("{} active contracts at offset {}", contracts.len(), offset);
	for contract in &contracts {
		info!(
			"   - {} ({})",
			contract.contract_id(),
			contract.created_event.template_id
		);
	}

	manager.flush().await;
	info!("Cache: {}", manager.stats_summary().await);
	Ok(())
}
