use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use uuid::Uuid;

/// Record identifier
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Public share token of `length` characters from `[A-Za-z0-9]`.
///
/// Drawn straight from the OS entropy source. `OsRng` panics if the source
/// fails, so a short or empty token is never produced.
pub fn new_token(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
