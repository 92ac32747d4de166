use {
    crate::{
        metrics::{BLOCKED_TXS_SIZE, NONCE_RETRIES_SIZE},
        util::HashMap,
    },
    metrics::gauge,
    std::time::{Duration, Instant},
    tokio::sync::Mutex,
};

/// Raw transactions whose bundles have failed too many times. Wallets keep
/// re-submitting these, so membership is checked before anything is proxied.
///
/// Entries expire after the TTL; the sweep runs inside every insert while the
/// lock is held.
#[derive(Debug)]
pub struct BlockedTxStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl BlockedTxStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::default(),
        }
    }

    pub async fn contains(&self, raw_tx_hex: &str) -> bool {
        self.entries.lock().await.contains_key(raw_tx_hex)
    }

    /// Returns the number of entries after the expiry sweep.
    pub async fn insert(&self, raw_tx_hex: &str) -> usize {
        self.insert_at(raw_tx_hex, Instant::now()).await
    }

    async fn insert_at(&self, raw_tx_hex: &str, now: Instant) -> usize {
        let mut entries = self.entries.lock().await;
        entries.insert(raw_tx_hex.to_owned(), now);
        entries.retain(|_, added| now.duration_since(*added) <= self.ttl);

        let len = entries.len();
        gauge!(BLOCKED_TXS_SIZE).set(len as f64);
        len
    }
}

#[derive(Debug, Clone, Copy)]
struct NonceRetryEntry {
    nonce: u64,
    num_tries: u64,
}

/// Synthetic nonces for senders whose bundle failed. Answering
/// `eth_getTransactionCount` with a nonce past the chain's view makes the
/// wallet conclude the transaction was mined and stop the retry storm.
#[derive(Debug)]
pub struct NonceRetryStore {
    max_tries: u64,
    entries: Mutex<HashMap<String, NonceRetryEntry>>,
}

impl NonceRetryStore {
    pub fn new(max_tries: u64) -> Self {
        Self {
            max_tries,
            entries: Mutex::default(),
        }
    }

    pub async fn seed(&self, sender: &str, nonce: u64) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            sender.to_lowercase(),
            NonceRetryEntry {
                nonce,
                num_tries: 0,
            },
        );
        gauge!(NONCE_RETRIES_SIZE).set(entries.len() as f64);
    }

    /// The seeded nonce for this sender, or `None` once the entry has been
    /// retired (or was never seeded). Each answer counts toward the bound;
    /// the entry is removed on the answer that reaches it so the wallet's
    /// next call resynchronises with the chain.
    pub async fn next_synthetic(&self, sender: &str) -> Option<u64> {
        let sender = sender.to_lowercase();
        let mut entries = self.entries.lock().await;

        let entry = entries.get_mut(&sender)?;
        entry.num_tries += 1;
        let nonce = entry.nonce;
        if entry.num_tries >= self.max_tries {
            entries.remove(&sender);
        }

        gauge!(NONCE_RETRIES_SIZE).set(entries.len() as f64);
        Some(nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_TX: &str = "0xf86b0185012a05f200825208947f367cc41522ce07553e823bf3be79a889debe1b808082025aa0";

    #[tokio::test]
    async fn blocked_tx_membership_is_exact_string() {
        let store = BlockedTxStore::new(Duration::from_secs(60));
        store.insert(RAW_TX).await;

        assert!(store.contains(RAW_TX).await);
        assert!(!store.contains(&RAW_TX.to_uppercase()).await);
        assert!(!store.contains("0xdead").await);
    }

    #[tokio::test]
    async fn expired_entries_are_swept_on_insert() {
        let ttl = Duration::from_secs(4 * 60 * 60);
        let store = BlockedTxStore::new(ttl);

        let t0 = Instant::now();
        assert_eq!(store.insert_at("0xaa", t0).await, 1);
        assert_eq!(store.insert_at("0xbb", t0 + Duration::from_secs(60)).await, 2);

        // both entries are now past the TTL; the next insert evicts them
        let later = t0 + ttl + Duration::from_secs(120);
        assert_eq!(store.insert_at("0xcc", later).await, 1);
        assert!(!store.contains("0xaa").await);
        assert!(!store.contains("0xbb").await);
        assert!(store.contains("0xcc").await);
    }

    #[tokio::test]
    async fn fresh_entries_survive_the_sweep() {
        let ttl = Duration::from_secs(60);
        let store = BlockedTxStore::new(ttl);

        let t0 = Instant::now();
        store.insert_at("0xaa", t0).await;
        assert_eq!(store.insert_at("0xbb", t0 + Duration::from_secs(30)).await, 2);
        assert!(store.contains("0xaa").await);
    }

    #[tokio::test]
    async fn nonce_store_answers_a_bounded_number_of_times() {
        let store = NonceRetryStore::new(4);
        store.seed("0xAbCd", 17).await;

        for _ in 0..4 {
            assert_eq!(store.next_synthetic("0xabcd").await, Some(17));
        }
        // retired after the fourth answer
        assert_eq!(store.next_synthetic("0xabcd").await, None);
    }

    #[tokio::test]
    async fn nonce_store_keys_are_case_insensitive() {
        let store = NonceRetryStore::new(4);
        store.seed("0xABCD", 3).await;
        assert_eq!(store.next_synthetic("0xaBcD").await, Some(3));
    }

    #[tokio::test]
    async fn unseeded_sender_is_not_handled() {
        let store = NonceRetryStore::new(4);
        assert_eq!(store.next_synthetic("0xabcd").await, None);
    }

    #[tokio::test]
    async fn reseeding_resets_the_try_counter() {
        let store = NonceRetryStore::new(2);
        store.seed("0xabcd", 5).await;
        assert_eq!(store.next_synthetic("0xabcd").await, Some(5));
        store.seed("0xabcd", 9).await;
        assert_eq!(store.next_synthetic("0xabcd").await, Some(9));
        assert_eq!(store.next_synthetic("0xabcd").await, Some(9));
        assert_eq!(store.next_synthetic("0xabcd").await, None);
    }
}
