/// Map used for request and file bookkeeping. Keys are never attacker controlled so the
/// faster non-secure hasher is fine.
pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
