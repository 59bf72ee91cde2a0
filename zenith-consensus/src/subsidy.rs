//! Block and miner subsidies, halvings, and community-fund allowances.

use std::convert::TryFrom;

use zenith_chain::{
    amount::{Amount, Error, NonNegative, COIN},
    block::Height,
};

/// The starting block subsidy, 12.5 coins, before any halving.
pub const MAX_BLOCK_SUBSIDY: u64 = 12 * COIN as u64 + COIN as u64 / 2;

/// The halving interval, in blocks.
pub const HALVING_INTERVAL: Height = Height(840_000);

/// The community-fund share of each subsidy, in percent.
pub const COMMUNITY_FUND_PERCENT: u64 = 12;

/// The `BlockSubsidy(height)`: halves every [`HALVING_INTERVAL`] blocks
/// until the value shifts to zero.
pub fn block_subsidy(height: Height) -> Result<Amount<NonNegative>, Error> {
    let halvings = height.0 / HALVING_INTERVAL.0;
    if halvings >= 64 {
        return Amount::try_from(0i64);
    }
    let subsidy = MAX_BLOCK_SUBSIDY >> (halvings as u64);
    Amount::try_from(subsidy)
}

/// The community-fund allowance carved out of the subsidy at `height`.
pub fn community_fund(height: Height) -> Result<Amount<NonNegative>, Error> {
    let subsidy: u64 = block_subsidy(height)?.into();
    Amount::try_from(subsidy * COMMUNITY_FUND_PERCENT / 100)
}

/// What the miner may claim at `height`, before fees.
pub fn miner_subsidy(height: Height) -> Result<Amount<NonNegative>, Error> {
    block_subsidy(height)? - community_fund(height)?
}

/// Returns the outputs in `transaction` whose value equals `amount`.
///
/// Used by the coinbase-distribution check: on networks with an active
/// community fund, the coinbase must carry an output of exactly the fund
/// allowance.
pub fn find_output_with_amount(
    transaction: &zenith_chain::transaction::Transaction,
    amount: Amount<NonNegative>,
) -> Vec<zenith_chain::transparent::Output> {
    transaction
        .outputs
        .iter()
        .filter(|output| output.value == amount)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsidy_halves_on_schedule() {
        assert_eq!(
            block_subsidy(Height(0)).unwrap().zatoshi(),
            1_250_000_000
        );
        assert_eq!(
            block_subsidy(HALVING_INTERVAL).unwrap().zatoshi(),
            625_000_000
        );
        assert_eq!(
            block_subsidy(Height(HALVING_INTERVAL.0 * 2)).unwrap().zatoshi(),
            312_500_000
        );
    }

    #[test]
    fn community_fund_is_a_fixed_share() {
        let fund = community_fund(Height(0)).unwrap();
        assert_eq!(fund.zatoshi(), 150_000_000);
        let miner = miner_subsidy(Height(0)).unwrap();
        assert_eq!(miner.zatoshi(), 1_100_000_000);
    }

    #[test]
    fn late_heights_have_no_subsidy() {
        assert!(block_subsidy(Height(HALVING_INTERVAL.0 * 64))
            .unwrap()
            .is_zero());
    }
}
