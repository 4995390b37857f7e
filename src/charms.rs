/// Charm bitfield decoding.
///
/// Charms arrive on the reveal event as a 16-bit field; the bit positions
/// follow the upstream ord vocabulary. Only decoding is needed here: the
/// query layer renders the set bits as lowercase names.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charm {
    Coin = 0,
    Cursed = 1,
    Epic = 2,
    Legendary = 3,
    Lost = 4,
    Nineball = 5,
    Rare = 6,
    Reinscription = 7,
    Unbound = 8,
    Uncommon = 9,
    Vindicated = 10,
    Mythic = 11,
    Burned = 12,
    Palindrome = 13,
}

impl Charm {
    pub const ALL: [Charm; 14] = [
        Charm::Coin,
        Charm::Cursed,
        Charm::Epic,
        Charm::Legendary,
        Charm::Lost,
        Charm::Nineball,
        Charm::Rare,
        Charm::Reinscription,
        Charm::Unbound,
        Charm::Uncommon,
        Charm::Vindicated,
        Charm::Mythic,
        Charm::Burned,
        Charm::Palindrome,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Charm::Coin => "coin",
            Charm::Cursed => "cursed",
            Charm::Epic => "epic",
            Charm::Legendary => "legendary",
            Charm::Lost => "lost",
            Charm::Nineball => "nineball",
            Charm::Rare => "rare",
            Charm::Reinscription => "reinscription",
            Charm::Unbound => "unbound",
            Charm::Uncommon => "uncommon",
            Charm::Vindicated => "vindicated",
            Charm::Mythic => "mythic",
            Charm::Burned => "burned",
            Charm::Palindrome => "palindrome",
        }
    }

    pub fn flag(&self) -> u16 {
        1 << (*self as u16)
    }

    /// Names of the set bits, in bit order.
    pub fn decode(bitfield: u16) -> Vec<&'static str> {
        Charm::ALL
            .iter()
            .filter(|c| bitfield & c.flag() != 0)
            .map(|c| c.label())
            .collect()
    }
}
