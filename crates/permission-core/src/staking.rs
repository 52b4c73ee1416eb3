use crate::scoring::{permission_for_amount, BoundaryTable};

/// Staked amount held in a staking program's local-state value.
///
/// The value starts with a one-byte tag followed by the amount as a
/// big-endian u64. Shorter values carry no stake.
pub fn staked_amount_from_state(value: &[u8]) -> u64 {
    match value.get(1..9) {
        Some(bytes) => {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            u64::from_be_bytes(arr)
        }
        None => 0,
    }
}

/// `(amount, permission)` pair stored in a record's staking fields.
pub fn staking_fields(amount: u64, table: &BoundaryTable) -> (u64, u64) {
    (amount, permission_for_amount(amount, table))
}
