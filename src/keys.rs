/// Column-family key encodings.
///
/// All numeric key segments are big-endian so RocksDB's lexicographic
/// iteration order equals numeric order; descending history reads are then
/// plain reverse iteration. Signed inscription numbers get a sign-flip bias
/// so cursed (negative) numbers sort before blessed ones.

/// Separator for variable-length string segments (addresses, tickers).
pub const SEP: u8 = 0x00;

pub fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

pub fn sat_key(ordinal_number: u64) -> [u8; 8] {
    ordinal_number.to_be_bytes()
}

pub fn tx_index_key(tx_index: u32) -> [u8; 4] {
    tx_index.to_be_bytes()
}

/// Order-preserving key for a signed inscription number.
pub fn number_key(number: i64) -> [u8; 8] {
    ((number as u64) ^ (1u64 << 63)).to_be_bytes()
}

pub fn number_from_key(key: &[u8]) -> Option<i64> {
    let raw: [u8; 8] = key.get(..8)?.try_into().ok()?;
    Some((u64::from_be_bytes(raw) ^ (1u64 << 63)) as i64)
}

pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for p in parts {
        out.extend_from_slice(p);
    }
    out
}

/// `string ‖ 0x00 ‖ rest...` — used where an address or ticker leads a
/// composite key.
pub fn string_prefix(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 1);
    out.extend_from_slice(s.as_bytes());
    out.push(SEP);
    out
}

/// Key of a location row: sat ‖ height ‖ tx_index.
pub fn location_key(ordinal_number: u64, height: u64, tx_index: u32) -> Vec<u8> {
    concat(&[&sat_key(ordinal_number), &height_key(height), &tx_index_key(tx_index)])
}

/// Key of a per-inscription transfer row: id ‖ height ‖ block_transfer_index.
pub fn inscription_transfer_key(inscription_id: &str, height: u64, bti: u32) -> Vec<u8> {
    concat(&[inscription_id.as_bytes(), &height_key(height), &tx_index_key(bti)])
}

/// Key of a per-block transfer row: height ‖ block_transfer_index ‖ number.
/// The number segment keeps rows distinct when one sat move carries several
/// inscriptions.
pub fn block_transfer_key(height: u64, bti: u32, number: i64) -> Vec<u8> {
    concat(&[&height_key(height), &tx_index_key(bti), &number_key(number)])
}

/// Key of a BRC-20 operation-log row: height ‖ tx_index ‖ intra.
pub fn operation_key(height: u64, tx_index: u32, intra: u32) -> Vec<u8> {
    concat(&[&height_key(height), &tx_index_key(tx_index), &tx_index_key(intra)])
}

/// Key of a balance row: address ‖ 0x00 ‖ ticker.
pub fn balance_key(address: &str, ticker: &str) -> Vec<u8> {
    concat(&[&string_prefix(address), ticker.as_bytes()])
}

/// Key of a holders-mirror row: ticker ‖ 0x00 ‖ address.
pub fn holder_key(ticker: &str, address: &str) -> Vec<u8> {
    concat(&[&string_prefix(ticker), address.as_bytes()])
}

/// Key of a balance-history row: address ‖ 0x00 ‖ ticker ‖ 0x00 ‖ height.
pub fn history_key(address: &str, ticker: &str, height: u64) -> Vec<u8> {
    concat(&[
        &string_prefix(address),
        &string_prefix(ticker),
        &height_key(height),
    ])
}
