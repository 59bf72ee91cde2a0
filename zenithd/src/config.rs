//! Daemon configuration: a TOML file merged with command-line flags.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use zenith_chain::parameters::{
    Network, DEFAULT_MAX_ORPHAN_TRANSACTIONS, DEFAULT_MIN_RELAY_TX_FEE,
};

/// The complete daemon configuration, as read from `-conf` and adjusted by
/// flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// The data directory; databases and block files live here.
    pub datadir: PathBuf,
    /// Which chain to validate.
    pub network: Network,
    /// Script verification parallelism; 0 means one task per core.
    pub par: usize,
    /// Coin view cache cap, in bytes.
    pub dbcache: usize,
    /// Relay fee floor, zatoshi per 1000 bytes.
    pub minrelaytxfee: u64,
    /// Allow the high-priority free-relay path.
    pub limitfreerelay: bool,
    /// Bound on inputs per relayed transaction; 0 disables the bound.
    pub mempooltxinputlimit: usize,
    /// Mempool size cap, in bytes.
    pub mempool_max_bytes: usize,
    /// Orphan pool bound.
    pub max_orphan_tx: usize,
    /// Peer connection cap (consumed by the network layer).
    pub maxconnections: usize,
    /// Misbehavior score that triggers a ban.
    pub banscore: u8,
    /// Ban duration in seconds.
    pub bantime: u64,
    /// Proof verification mode: "disabled", "sync", or "async".
    pub proof_verification: String,
    /// Rebuild the chain state from block files on startup.
    pub reindex: bool,
    /// Like `reindex`, but trusts block files enough to skip re-checking
    /// proofs.
    pub reindex_fast: bool,
    /// Enabled secondary indexes.
    pub txindex: bool,
    pub addressindex: bool,
    pub timestampindex: bool,
    pub spentindex: bool,
    pub maturityheightindex: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            datadir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("zenith"),
            network: Network::Mainnet,
            par: 0,
            dbcache: 450 * 1024 * 1024,
            minrelaytxfee: DEFAULT_MIN_RELAY_TX_FEE,
            limitfreerelay: true,
            mempooltxinputlimit: 0,
            mempool_max_bytes: 300 * 1024 * 1024,
            max_orphan_tx: DEFAULT_MAX_ORPHAN_TRANSACTIONS,
            maxconnections: 125,
            banscore: 100,
            bantime: 24 * 60 * 60,
            proof_verification: "async".to_string(),
            reindex: false,
            reindex_fast: false,
            txindex: false,
            addressindex: false,
            timestampindex: false,
            spentindex: false,
            maturityheightindex: false,
        }
    }
}

impl Config {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &std::path::Path) -> Result<Config, crate::InitError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                toml::from_str(&contents).map_err(|e| crate::InitError::BadConfig(e.to_string()))
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(error) => Err(crate::InitError::Io(error)),
        }
    }

    pub fn any_index_enabled(&self) -> bool {
        self.txindex
            || self.addressindex
            || self.timestampindex
            || self.spentindex
            || self.maturityheightindex
    }

    pub fn proof_mode(
        &self,
    ) -> Result<zenith_consensus::ProofVerification, crate::InitError> {
        match self.proof_verification.as_str() {
            "disabled" => Ok(zenith_consensus::ProofVerification::Disabled),
            "sync" => Ok(zenith_consensus::ProofVerification::Sync),
            "async" => Ok(zenith_consensus::ProofVerification::Async),
            other => Err(crate::InitError::BadConfig(format!(
                "unknown proof verification mode: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.network, Network::Mainnet);
        assert!(config.limitfreerelay);
        assert!(!config.any_index_enabled());
    }

    #[test]
    fn partial_override() {
        let config: Config = toml::from_str(
            r#"
                par = 4
                txindex = true
                proof_verification = "sync"
            "#,
        )
        .unwrap();
        assert_eq!(config.par, 4);
        assert!(config.txindex);
        assert!(config.any_index_enabled());
    }
}
