//! Password hashing primitives.
//!
//! bcrypt with work factor 12. The stored string is the full bcrypt
//! record (salt included), so verification needs no side table.

use bcrypt::{hash, verify};

const WORK_FACTOR: u32 = 12;

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password, WORK_FACTOR)
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    verify(password, stored_hash).unwrap_or(false)
}
