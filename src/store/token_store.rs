use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use crate::error::ClientError;
use crate::helpers::time::Clock;
use crate::parser::claims::{decode_expiry, has_jwt_shape};
use crate::store::credential::Credential;
use crate::store::kv::KeyValueStore;

/// Current record: `{ "token": "...", "expiry": <unix seconds> }`
pub const CREDENTIAL_KEY: &str = "credential";
/// Older clients stored the bare token string under this key.
pub const LEGACY_TOKEN_KEY: &str = "token";
pub const LEGACY_EXPIRY_KEY: &str = "tokenExpiry";

pub const DEFAULT_LEGACY_TTL_SECONDS: i64 = 24 * 60 * 60;

/// Persistence of the single current credential.
///
/// The only writer of credential storage. Storage is read once; afterwards
/// the credential is served from memory and storage is only written on
/// change. Every stored token starts a new session number.
pub struct TokenStore {
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    legacy_ttl_seconds: i64,
    // outer None: storage not read yet
    cached: RwLock<Option<Option<Credential>>>,
    session: AtomicU64,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, legacy_ttl_seconds: i64) -> Self {
        Self {
            storage,
            clock,
            legacy_ttl_seconds,
            cached: RwLock::new(None),
            session: AtomicU64::new(0),
        }
    }

    /// Number of the current session; moves whenever a token is stored.
    pub fn session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    fn remember(&self, credential: Option<Credential>) {
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(credential);
    }

    /// Read the persisted credential, migrating a legacy bare token if that is
    /// all there is.
    pub fn load(&self) -> Option<Credential> {
        if let Some(cached) = self.cached.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return cached.clone();
        }

        let mut cached = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(credential) = cached.as_ref() {
            return credential.clone();
        }
        match self.read_storage() {
            Ok(credential) => {
                *cached = Some(credential.clone());
                credential
            }
            Err(e) => {
                // not cached, the next load reads storage again
                error!(error = %e, "failed to read credential");
                None
            }
        }
    }

    fn read_storage(&self) -> anyhow::Result<Option<Credential>> {
        if let Some(raw) = self.storage.get(CREDENTIAL_KEY)? {
            return match serde_json::from_str::<Credential>(&raw) {
                Ok(credential) => Ok(Some(credential)),
                Err(e) => {
                    warn!(error = %e, "stored credential is corrupt, clearing");
                    self.wipe_storage();
                    Ok(None)
                }
            };
        }

        let token = self
            .storage
            .get(LEGACY_TOKEN_KEY)?
            .map(|t| t.trim().trim_matches('"').to_owned())
            .filter(|t| !t.is_empty());

        Ok(token.map(|token| self.migrate(token)))
    }

    fn migrate(&self, token: String) -> Credential {
        let expiry = decode_expiry(&token).unwrap_or_else(|e| {
            let fallback = self.clock.now() + self.legacy_ttl_seconds;
            warn!(error = %e, expiry = fallback, "legacy token has no readable expiry, assuming default lifetime");
            fallback
        });
        let credential = Credential::new(token, expiry);

        match self.persist(&credential) {
            Ok(()) => {
                for key in [LEGACY_TOKEN_KEY, LEGACY_EXPIRY_KEY] {
                    if let Err(e) = self.storage.remove(key) {
                        warn!(key, error = %e, "failed to remove legacy key after migration");
                    }
                }
                info!(expiry, "migrated legacy token to credential record");
            }
            Err(e) => warn!(error = %e, "failed to persist migrated credential"),
        }
        credential
    }

    /// Validate, decode and persist a freshly issued token.
    ///
    /// A token that cannot be decoded voids the current session.
    pub fn save(&self, token: &str) -> Result<Credential, ClientError> {
        if !has_jwt_shape(token) {
            self.clear();
            return Err(ClientError::InvalidTokenFormat(
                "expected three dot-separated segments".to_owned(),
            ));
        }
        let expiry = match decode_expiry(token) {
            Ok(expiry) => expiry,
            Err(e) => {
                self.clear();
                return Err(ClientError::InvalidTokenFormat(e.to_string()));
            }
        };

        let credential = Credential::new(token.to_owned(), expiry);
        self.persist(&credential)
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        self.remember(Some(credential.clone()));
        let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(expiry, session, "credential saved");
        Ok(credential)
    }

    fn persist(&self, credential: &Credential) -> anyhow::Result<()> {
        let raw = serde_json::to_string(credential)?;
        self.storage.set(CREDENTIAL_KEY, &raw)
    }

    /// Remove every trace of the session. Safe to call repeatedly.
    pub fn clear(&self) {
        self.remember(None);
        self.wipe_storage();
        debug!("credential cleared");
    }

    fn wipe_storage(&self) {
        for key in [CREDENTIAL_KEY, LEGACY_TOKEN_KEY, LEGACY_EXPIRY_KEY] {
            if let Err(e) = self.storage.remove(key) {
                error!(key, error = %e, "failed to clear credential key");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::time::ManualClock;
    use crate::store::kv::MemoryStore;
    use crate::tests::common::sample_jwt;
    use std::sync::atomic::AtomicUsize;

    const NOW: i64 = 1_760_000_000;

    fn store_with(storage: Arc<MemoryStore>) -> TokenStore {
        TokenStore::new(storage, Arc::new(ManualClock::new(NOW)), DEFAULT_LEGACY_TTL_SECONDS)
    }

    #[test]
    fn save_then_load() {
        let storage = Arc::new(MemoryStore::new());
        let store = store_with(storage.clone());
        let token = sample_jwt(NOW + 3600);

        let saved = store.save(&token).unwrap();
        assert_eq!(saved.expiry, NOW + 3600);
        assert_eq!(store.load(), Some(Credential::new(token, NOW + 3600)));
    }

    #[test]
    fn save_rejects_opaque_token_and_voids_session() {
        let storage = Arc::new(MemoryStore::new());
        let store = store_with(storage.clone());
        store.save(&sample_jwt(NOW + 60)).unwrap();

        let err = store.save("not-a-jwt").unwrap_err();
        assert!(matches!(err, ClientError::InvalidTokenFormat(_)));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn save_rejects_undecodable_payload() {
        let store = store_with(Arc::new(MemoryStore::new()));
        let err = store.save("aaa.%%%.ccc").unwrap_err();
        assert!(matches!(err, ClientError::InvalidTokenFormat(_)));
    }

    #[test]
    fn legacy_token_is_migrated_once() {
        let storage = Arc::new(MemoryStore::new());
        let token = sample_jwt(NOW + 7200);
        storage.set(LEGACY_TOKEN_KEY, &token).unwrap();

        let store = store_with(storage.clone());
        let loaded = store.load().unwrap();
        assert_eq!(loaded.expiry, NOW + 7200);

        // new format persisted, legacy key gone
        let raw = storage.get(CREDENTIAL_KEY).unwrap().unwrap();
        let persisted: Credential = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted, loaded);
        assert_eq!(storage.get(LEGACY_TOKEN_KEY).unwrap(), None);

        // a second load reads the new record as-is
        storage.set(CREDENTIAL_KEY, &raw).unwrap();
        assert_eq!(store_with(storage.clone()).load(), Some(loaded));
        assert_eq!(storage.get(LEGACY_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn legacy_token_without_claims_gets_default_lifetime() {
        let storage = Arc::new(MemoryStore::new());
        storage.set(LEGACY_TOKEN_KEY, "opaque-legacy-session").unwrap();

        let loaded = store_with(storage).load().unwrap();
        assert_eq!(loaded.token, "opaque-legacy-session");
        assert_eq!(loaded.expiry, NOW + DEFAULT_LEGACY_TTL_SECONDS);
    }

    #[test]
    fn corrupt_record_is_cleared() {
        let storage = Arc::new(MemoryStore::new());
        storage.set(CREDENTIAL_KEY, "{broken").unwrap();
        let store = store_with(storage.clone());

        assert_eq!(store.load(), None);
        assert_eq!(storage.get(CREDENTIAL_KEY).unwrap(), None);
    }

    #[test]
    fn clear_is_idempotent_and_removes_legacy_keys() {
        let storage = Arc::new(MemoryStore::new());
        storage.set(LEGACY_TOKEN_KEY, "x").unwrap();
        storage.set(LEGACY_EXPIRY_KEY, "1").unwrap();
        let store = store_with(storage.clone());
        store.save(&sample_jwt(NOW + 60)).unwrap();

        store.clear();
        store.clear();
        for key in [CREDENTIAL_KEY, LEGACY_TOKEN_KEY, LEGACY_EXPIRY_KEY] {
            assert_eq!(storage.get(key).unwrap(), None);
        }
        assert_eq!(store.load(), None);
    }

    /// Counts reads that reach the backing storage.
    struct CountingStore {
        inner: MemoryStore,
        reads: AtomicUsize,
    }

    impl KeyValueStore for CountingStore {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> anyhow::Result<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn storage_is_read_once_then_served_from_memory() {
        let storage = Arc::new(CountingStore { inner: MemoryStore::new(), reads: AtomicUsize::new(0) });
        storage.inner.set(CREDENTIAL_KEY, &serde_json::to_string(&Credential::new(sample_jwt(NOW + 60), NOW + 60)).unwrap()).unwrap();
        let store = TokenStore::new(storage.clone(), Arc::new(ManualClock::new(NOW)), DEFAULT_LEGACY_TTL_SECONDS);

        for _ in 0..5 {
            assert_eq!(store.load().unwrap().expiry, NOW + 60);
        }
        assert_eq!(storage.reads.load(Ordering::SeqCst), 1);

        store.clear();
        assert_eq!(store.load(), None);
        store.save(&sample_jwt(NOW + 120)).unwrap();
        assert_eq!(store.load().unwrap().expiry, NOW + 120);
        assert_eq!(storage.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_storage_is_not_reread() {
        let storage = Arc::new(CountingStore { inner: MemoryStore::new(), reads: AtomicUsize::new(0) });
        let store = TokenStore::new(storage.clone(), Arc::new(ManualClock::new(NOW)), DEFAULT_LEGACY_TTL_SECONDS);

        assert_eq!(store.load(), None);
        assert_eq!(store.load(), None);
        // credential key, then the legacy key
        assert_eq!(storage.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn session_moves_only_when_a_token_is_stored() {
        let store = store_with(Arc::new(MemoryStore::new()));
        let start = store.session();

        store.save(&sample_jwt(NOW + 60)).unwrap();
        assert_eq!(store.session(), start + 1);
        store.clear();
        assert_eq!(store.session(), start + 1);
        assert!(store.save("opaque").is_err());
        assert_eq!(store.session(), start + 1);
        store.save(&sample_jwt(NOW + 120)).unwrap();
        assert_eq!(store.session(), start + 2);
    }
}
