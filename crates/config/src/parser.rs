use crate::*;
use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use common::{Chain, Currency, Pair, Platform, TxType};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<LedgerConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());
    parse_config(&content)
}

/// Parse configuration text after environment substitution
pub fn parse_config(content: &str) -> Result<LedgerConfig> {
    let substituted = substitution::substitute_env_vars(content)?;

    let config: LedgerConfig = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;

    info!(
        service = %config.service.name,
        currencies = config.reference.currencies.len(),
        pairs = config.reference.pairs.len(),
        "Configuration loaded"
    );
    Ok(config)
}

/// A runnable development configuration with one BTC/USDT market
#[instrument]
pub fn generate_default_config() -> LedgerConfig {
    LedgerConfig {
        service: ServiceConfig {
            name: "ledgerd".to_string(),
            environment: Environment::Development,
        },
        logging: LoggingConfig::default(),
        storage: StorageConfig::default(),
        settlement: SettlementConfig::default(),
        metrics: MetricsConfig::default(),
        reference: ReferenceData {
            currencies: vec![
                sample_currency(1, "Bitcoin", "btc", vec![1]),
                sample_currency(2, "Tether", "usdt", vec![]),
            ],
            chains: vec![Chain {
                id: 1,
                name: "Bitcoin".to_string(),
                rpc: String::new(),
                block: 0,
                network: "mainnet".to_string(),
                explorer_link: String::new(),
                platform: Platform::Bitcoin,
                confirmation: 3,
                time_withdraw: 0,
                fees: BigDecimal::from(0),
                tag: "btc".to_string(),
                parent_symbol: "btc".to_string(),
                decimals: 8,
                status: true,
            }],
            pairs: vec![Pair {
                id: 1,
                base_unit: "btc".to_string(),
                quote_unit: "usdt".to_string(),
                price: BigDecimal::from(0),
                base_decimal: 8,
                quote_decimal: 2,
                status: true,
            }],
            contracts: vec![],
        },
    }
}

fn sample_currency(id: i64, name: &str, symbol: &str, chains: Vec<i64>) -> Currency {
    let tenths = |n: i64| BigDecimal::from(n) / BigDecimal::from(10);
    Currency {
        id,
        name: name.to_string(),
        symbol: symbol.to_string(),
        min_withdraw: BigDecimal::from(0),
        max_withdraw: BigDecimal::from(0),
        min_trade: BigDecimal::from(0),
        max_trade: BigDecimal::from(0),
        fees_trade: tenths(2),
        fees_discount: tenths(1),
        fees_charges: BigDecimal::from(0),
        fees_costs: BigDecimal::from(0),
        marker: false,
        status: true,
        tx_type: TxType::Crypto,
        chains,
    }
}

#[instrument]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &LedgerConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}
