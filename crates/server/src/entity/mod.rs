pub mod account;
pub mod client;
pub mod kv_entry;

/// Status value for an active account or client.
pub const STATUS_VALID: i16 = 0;
/// Status value for a disabled account or client.
pub const STATUS_INVALID: i16 = 255;
