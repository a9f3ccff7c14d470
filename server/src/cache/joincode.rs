//! Join-Code Cache Operations
//!
//! Short human codes map to live sessions. Codes avoid glyphs that read
//! ambiguously on a projected screen (0/O, 1/I/L).

use qz_common::{JoinCode, SessionId};
use rand::Rng;

use super::{keys, CacheError, CacheFacade};

/// Alphabet for generated codes; ambiguous glyphs excluded.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Length of generated join codes.
const CODE_LEN: usize = 6;

/// Mint a random join code. Uniqueness is enforced at registration time via
/// [`CacheFacade::register_join_code`].
pub fn generate_join_code() -> JoinCode {
    let mut rng = rand::thread_rng();
    let code: String = (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    JoinCode::new(code)
}

impl CacheFacade {
    /// Map `code` to `session` for the join-code TTL.
    pub async fn set_join_code(
        &self,
        code: &JoinCode,
        session: &SessionId,
    ) -> Result<(), CacheError> {
        self.kv_set(
            "set_join_code",
            &keys::join_code(code),
            session.as_str(),
            Some(keys::JOIN_CODE_TTL),
        )
        .await
    }

    /// Claim `code` for `session` only if it is not already taken.
    /// Returns `false` when another live session holds the code.
    pub async fn register_join_code(
        &self,
        code: &JoinCode,
        session: &SessionId,
    ) -> Result<bool, CacheError> {
        self.kv_set_nx(
            "register_join_code",
            &keys::join_code(code),
            session.as_str(),
            keys::JOIN_CODE_TTL,
        )
        .await
    }

    pub async fn get_join_code(&self, code: &JoinCode) -> Result<Option<SessionId>, CacheError> {
        Ok(self
            .kv_get("get_join_code", &keys::join_code(code))
            .await?
            .map(SessionId::new))
    }

    pub async fn join_code_exists(&self, code: &JoinCode) -> Result<bool, CacheError> {
        self.kv_exists("join_code_exists", &keys::join_code(code)).await
    }

    pub async fn delete_join_code(&self, code: &JoinCode) -> Result<(), CacheError> {
        self.kv_del("delete_join_code", &keys::join_code(code)).await
    }
}
