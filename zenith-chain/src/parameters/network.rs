//! Network selection and per-network consensus parameters.

use serde::{Deserialize, Serialize};

/// The chain a node is validating.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Network {
    /// The production mainnet.
    Mainnet,
    /// The oldest public test network.
    Testnet,
    /// Private testing network with trivial proof-of-work.
    Regtest,
}

impl Default for Network {
    fn default() -> Self {
        Network::Mainnet
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Mainnet => f.write_str("main"),
            Network::Testnet => f.write_str("test"),
            Network::Regtest => f.write_str("regtest"),
        }
    }
}

/// Tunable consensus parameters that differ between networks.
///
/// Tests construct these directly to pin the values a scenario depends on.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NetworkParameters {
    /// The network these parameters describe.
    pub network: Network,
    /// The depth at which sidechain forward-transfer funds mature into the
    /// sidechain balance.
    pub sc_coin_maturity: u32,
    /// Whether proof-of-work checks are required. Disabled on regtest.
    pub require_pow: bool,
    /// Whether the coinbase must dedicate an output to the community-fund
    /// allowance. The fund scripts are per-network chain data; regtest
    /// declares none.
    pub community_fund_active: bool,
}

impl NetworkParameters {
    pub fn new(network: Network) -> Self {
        match network {
            Network::Mainnet | Network::Testnet => NetworkParameters {
                network,
                sc_coin_maturity: 2,
                require_pow: true,
                community_fund_active: true,
            },
            Network::Regtest => NetworkParameters {
                network,
                sc_coin_maturity: 2,
                require_pow: false,
                community_fund_active: false,
            },
        }
    }
}

impl Default for NetworkParameters {
    fn default() -> Self {
        NetworkParameters::new(Network::Mainnet)
    }
}
