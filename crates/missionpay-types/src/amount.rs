//! Token amounts and proportional splits
//!
//! Amounts are integers in the smallest unit of the payment token. Splits are
//! expressed in basis points and always distribute an amount exactly.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MissionError, Result};

/// Total basis points in a whole
pub const BPS_DENOMINATOR: u16 = 10_000;

/// An amount of a token in its smallest unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Amount(pub u64);

impl Amount {
    pub fn zero() -> Self {
        Self(0)
    }

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Sum amounts, failing on overflow
    pub fn sum<'a>(amounts: impl IntoIterator<Item = &'a Amount>) -> Option<Amount> {
        amounts
            .into_iter()
            .try_fold(Amount::zero(), |acc, a| acc.checked_add(*a))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A proportional split between the client and the agent side, in basis points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub client_bps: u16,
    pub agent_bps: u16,
}

impl Split {
    /// Create a split; the two shares must sum to exactly 10000
    pub fn new(client_bps: u16, agent_bps: u16) -> Result<Self> {
        if u32::from(client_bps) + u32::from(agent_bps) != u32::from(BPS_DENOMINATOR) {
            return Err(MissionError::InvalidSplit {
                client_bps,
                agent_bps,
            });
        }
        Ok(Self {
            client_bps,
            agent_bps,
        })
    }

    /// Everything to the agents
    pub fn all_to_agents() -> Self {
        Self {
            client_bps: 0,
            agent_bps: BPS_DENOMINATOR,
        }
    }

    /// Everything back to the client
    pub fn all_to_client() -> Self {
        Self {
            client_bps: BPS_DENOMINATOR,
            agent_bps: 0,
        }
    }

    /// Split `total` into (client share, agent share)
    ///
    /// The client share is floored; the agent side receives the remainder, so
    /// the two parts always sum to `total`.
    pub fn apply(&self, total: Amount) -> (Amount, Amount) {
        let client =
            (u128::from(total.0) * u128::from(self.client_bps) / u128::from(BPS_DENOMINATOR)) as u64;
        (Amount(client), Amount(total.0 - client))
    }
}

/// Distribute `total` across recipients proportionally to `weights`
///
/// Floors each share and hands the rounding remainder to the last recipient.
/// Returns all-zero shares when every weight is zero.
pub fn pro_rata(total: Amount, weights: &[Amount]) -> Vec<Amount> {
    let weight_sum: u128 = weights.iter().map(|w| u128::from(w.0)).sum();
    if weights.is_empty() || weight_sum == 0 {
        return vec![Amount::zero(); weights.len()];
    }

    let mut shares: Vec<Amount> = weights
        .iter()
        .map(|w| Amount((u128::from(total.0) * u128::from(w.0) / weight_sum) as u64))
        .collect();

    let allocated: u64 = shares.iter().map(|s| s.0).sum();
    if let Some(last) = shares.last_mut() {
        last.0 += total.0 - allocated;
    }
    shares
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_must_sum_to_whole() {
        assert!(Split::new(7000, 3000).is_ok());
        assert!(Split::new(7000, 2999).is_err());
        assert!(Split::new(10_000, 1).is_err());
    }

    #[test]
    fn test_split_apply_is_exact() {
        let split = Split::new(7000, 3000).unwrap();
        assert_eq!(split.apply(Amount(1000)), (Amount(700), Amount(300)));

        let (client, agent) = split.apply(Amount(333));
        assert_eq!(client.0 + agent.0, 333);
        assert_eq!(client, Amount(233));
    }

    #[test]
    fn test_pro_rata_remainder_goes_last() {
        let shares = pro_rata(Amount(10), &[Amount(1), Amount(1), Amount(1)]);
        assert_eq!(shares, vec![Amount(3), Amount(3), Amount(4)]);

        let shares = pro_rata(Amount(16), &[Amount(8), Amount(8)]);
        assert_eq!(shares, vec![Amount(8), Amount(8)]);
    }

    #[test]
    fn test_sum_overflow() {
        assert_eq!(Amount::sum(&[Amount(1), Amount(2)]), Some(Amount(3)));
        assert_eq!(Amount::sum(&[Amount(u64::MAX), Amount(1)]), None);
    }
}
