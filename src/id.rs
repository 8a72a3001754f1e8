use crate::models::ShortId;

/// URL-safe alphabet, 64 symbols.
pub const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

pub const ID_LENGTH: usize = 8;

/// Produces candidate short ids.
///
/// Generators are pure and never consult the store. Uniqueness is enforced
/// by the store when the candidate is inserted.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> ShortId;
}

/// Uniformly random 8-symbol ids, 48 bits of entropy each.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> ShortId {
        let bytes: [u8; ID_LENGTH] = rand::random();
        // 256 is a multiple of 64, so masking keeps the draw uniform.
        let id = bytes
            .iter()
            .map(|b| char::from(ALPHABET[usize::from(b & 63)]))
            .collect::<String>();
        ShortId::new(id)
    }
}
