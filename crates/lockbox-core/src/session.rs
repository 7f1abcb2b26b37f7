use crate::crypto::{sha512_hex, KdfParams};
use zeroize::Zeroizing;

/// Identity and key material for one signed-in user.
///
/// Passed explicitly into the codec and the sync session; nothing about the
/// current user lives in process-wide state.
#[derive(Clone)]
pub struct SessionContext {
    username_upper: String,
    passphrase: Zeroizing<String>,
    unique_text: String,
    pub cache_locally: bool,
    pub kdf: KdfParams,
}

impl SessionContext {
    /// `unique_text` distinguishes one deployment from another (for example
    /// the service host name) so identical credentials on two deployments
    /// produce unrelated keys and object names.
    pub fn new(username: &str, passphrase: &str, unique_text: &str) -> Self {
        Self {
            username_upper: username.to_uppercase(),
            passphrase: Zeroizing::new(passphrase.to_string()),
            unique_text: unique_text.to_uppercase(),
            cache_locally: true,
            kdf: KdfParams::default(),
        }
    }

    pub fn with_cache(mut self, cache_locally: bool) -> Self {
        self.cache_locally = cache_locally;
        self
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn username(&self) -> &str {
        &self.username_upper
    }

    pub fn set_passphrase(&mut self, passphrase: &str) {
        self.passphrase = Zeroizing::new(passphrase.to_string());
    }

    /// Secret fed to the key derivation: passphrase followed by the
    /// deployment text.
    pub fn key_material(&self) -> Zeroizing<Vec<u8>> {
        let mut material = Zeroizing::new(Vec::with_capacity(
            self.passphrase.len() + self.unique_text.len(),
        ));
        material.extend_from_slice(self.passphrase.as_bytes());
        material.extend_from_slice(self.unique_text.as_bytes());
        material
    }

    /// Object name shared by the local cache and the remote store.
    pub fn credential_name(&self) -> String {
        sha512_hex(&[
            self.username_upper.as_bytes(),
            self.passphrase.as_bytes(),
            self.unique_text.as_bytes(),
        ])
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("username", &self.username_upper)
            .field("unique_text", &self.unique_text)
            .field("cache_locally", &self.cache_locally)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_name_ignores_username_case() {
        let a = SessionContext::new("Alice", "pw", "vault.example");
        let b = SessionContext::new("ALICE", "pw", "vault.example");
        assert_eq!(a.credential_name(), b.credential_name());
    }

    #[test]
    fn credential_name_changes_with_passphrase() {
        let mut ctx = SessionContext::new("alice", "pw", "vault.example");
        let before = ctx.credential_name();
        ctx.set_passphrase("pw2");
        assert_ne!(before, ctx.credential_name());
    }

    #[test]
    fn debug_output_hides_passphrase() {
        let ctx = SessionContext::new("alice", "hunter2", "host");
        assert!(!format!("{ctx:?}").contains("hunter2"));
    }
}
