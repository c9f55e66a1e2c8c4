use chrono::{DateTime, SecondsFormat, Utc};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Timestamp format written to every TEXT datetime column.
pub fn db_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Application keys are stored only as their SHA-256 hex digest.
pub fn hash_application_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

pub fn generate_application_key() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!("rk_{}", hex::encode(bytes))
}
