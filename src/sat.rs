/// Satoshi Number Service
///
/// Pure, deterministic derivations over an ordinal number: rarity, coinbase
/// height, cycle/epoch/period, and the decimal/degree/percentile/name
/// renderings. No I/O; everything follows from the Bitcoin issuance
/// schedule.

use serde::{Deserialize, Serialize};

use crate::errors::ChainError;

/// Total number of sats that will ever exist.
pub const SAT_SUPPLY: u64 = 2_099_999_997_690_000;

/// Largest valid ordinal number.
pub const MAX_ORDINAL: u64 = SAT_SUPPLY - 1;

/// Blocks per halving epoch.
pub const EPOCH_BLOCKS: u64 = 210_000;

/// Blocks per difficulty-adjustment period.
pub const PERIOD_BLOCKS: u64 = 2_016;

/// Halving epochs per cycle (conjunctions of halving and difficulty
/// adjustment).
pub const CYCLE_EPOCHS: u64 = 6;

/// Block subsidy of epoch 0, in sats.
const INITIAL_SUBSIDY: u64 = 50 * 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SatRarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
    Mythic,
}

impl SatRarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            SatRarity::Common => "common",
            SatRarity::Uncommon => "uncommon",
            SatRarity::Rare => "rare",
            SatRarity::Epic => "epic",
            SatRarity::Legendary => "legendary",
            SatRarity::Mythic => "mythic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "common" => Some(SatRarity::Common),
            "uncommon" => Some(SatRarity::Uncommon),
            "rare" => Some(SatRarity::Rare),
            "epic" => Some(SatRarity::Epic),
            "legendary" => Some(SatRarity::Legendary),
            "mythic" => Some(SatRarity::Mythic),
            _ => None,
        }
    }

    /// Rank used when ordering query results by rarity.
    pub fn rank(&self) -> u8 {
        match self {
            SatRarity::Common => 0,
            SatRarity::Uncommon => 1,
            SatRarity::Rare => 2,
            SatRarity::Epic => 3,
            SatRarity::Legendary => 4,
            SatRarity::Mythic => 5,
        }
    }
}

/// A validated ordinal number with its position in the issuance schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sat {
    ordinal: u64,
    coinbase_height: u64,
    /// Offset of this sat within its coinbase block's subsidy.
    offset: u64,
}

impl Sat {
    pub fn new(ordinal: u64) -> Result<Self, ChainError> {
        if ordinal > MAX_ORDINAL {
            return Err(ChainError::InvalidSatRange(ordinal));
        }
        let mut remaining = ordinal;
        let mut height = 0u64;
        let mut subsidy = INITIAL_SUBSIDY;
        while subsidy > 0 && remaining >= subsidy * EPOCH_BLOCKS {
            remaining -= subsidy * EPOCH_BLOCKS;
            height += EPOCH_BLOCKS;
            subsidy /= 2;
        }
        // subsidy cannot reach zero before the supply is exhausted, and the
        // range check above already excluded ordinals past the supply
        debug_assert!(subsidy > 0);
        Ok(Sat {
            ordinal,
            coinbase_height: height + remaining / subsidy,
            offset: remaining % subsidy,
        })
    }

    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// Height of the block whose coinbase first minted this sat.
    pub fn coinbase_height(&self) -> u64 {
        self.coinbase_height
    }

    /// Offset within the coinbase block's subsidy.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn epoch(&self) -> u64 {
        self.coinbase_height / EPOCH_BLOCKS
    }

    pub fn period(&self) -> u64 {
        self.coinbase_height / PERIOD_BLOCKS
    }

    pub fn cycle(&self) -> u64 {
        self.epoch() / CYCLE_EPOCHS
    }

    pub fn rarity(&self) -> SatRarity {
        if self.offset != 0 {
            return SatRarity::Common;
        }
        if self.coinbase_height == 0 {
            SatRarity::Mythic
        } else if self.coinbase_height % (EPOCH_BLOCKS * CYCLE_EPOCHS) == 0 {
            SatRarity::Legendary
        } else if self.coinbase_height % EPOCH_BLOCKS == 0 {
            SatRarity::Epic
        } else if self.coinbase_height % PERIOD_BLOCKS == 0 {
            SatRarity::Rare
        } else {
            SatRarity::Uncommon
        }
    }

    /// `<coinbase_height>.<offset>`
    pub fn decimal(&self) -> String {
        format!("{}.{}", self.coinbase_height, self.offset)
    }

    /// `<cycle>°<block-in-epoch>′<block-in-period>″<offset>‴`
    pub fn degree(&self) -> String {
        format!(
            "{}°{}′{}″{}‴",
            self.cycle(),
            self.coinbase_height % EPOCH_BLOCKS,
            self.coinbase_height % PERIOD_BLOCKS,
            self.offset
        )
    }

    /// Position within the total supply, rendered with shortest
    /// round-trip precision and a trailing percent sign.
    pub fn percentile(&self) -> String {
        format!("{}%", (self.ordinal as f64 / MAX_ORDINAL as f64) * 100.0)
    }

    /// Base-26 name, `a` through `z`, assigned in reverse ordinal order so
    /// the last sat to be mined is named `a`.
    pub fn name(&self) -> String {
        let mut x = SAT_SUPPLY - self.ordinal;
        let mut name = String::new();
        while x > 0 {
            name.push(
                "abcdefghijklmnopqrstuvwxyz"
                    .chars()
                    .nth(((x - 1) % 26) as usize)
                    .unwrap_or('a'),
            );
            x = (x - 1) / 26;
        }
        name.chars().rev().collect()
    }
}
