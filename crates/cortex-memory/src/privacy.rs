use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Notify;
use tracing::info;

use cortex_core::types::FactCategory;

/// Gates read/write access to `Shadow` and `Vault` facts (spec C7 Privacy
/// Lock). Starts locked; `unlock()` arms an idle timer that relocks the
/// state automatically after `idle_secs` of inactivity, tracked by storing
/// the deadline as a unix timestamp and racing it against a `Notify` that
/// `touch()`/`lock()` wake.
pub struct PrivacyLock {
    unlocked: AtomicBool,
    deadline_unix_secs: AtomicU64,
    idle_secs: u64,
    relock: Arc<Notify>,
}

impl PrivacyLock {
    pub fn new(idle_secs: u64) -> Arc<Self> {
        Arc::new(Self {
            unlocked: AtomicBool::new(false),
            deadline_unix_secs: AtomicU64::new(0),
            idle_secs,
            relock: Arc::new(Notify::new()),
        })
    }

    /// Unlocks the store and spawns the idle-relock watcher if not already
    /// running. Calling this again while unlocked simply extends the deadline.
    pub fn unlock(self: &Arc<Self>) {
        let was_locked = !self.unlocked.swap(true, Ordering::SeqCst);
        self.extend_deadline();
        info!("privacy lock unlocked");
        if was_locked {
            let this = self.clone();
            tokio::spawn(async move { this.run_idle_watcher().await });
        } else {
            self.relock.notify_one();
        }
    }

    pub fn lock(&self) {
        self.unlocked.store(false, Ordering::SeqCst);
        self.relock.notify_one();
        info!("privacy lock engaged");
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    /// Shadow/Vault access resets the idle countdown; General/Project/Style
    /// facts are never gated and never touch the timer.
    pub fn is_accessible(&self, category: FactCategory) -> bool {
        if !category.is_protected() {
            return true;
        }
        if self.is_unlocked() {
            self.extend_deadline();
            true
        } else {
            false
        }
    }

    fn extend_deadline(&self) {
        let deadline = now_unix_secs() + self.idle_secs;
        self.deadline_unix_secs.store(deadline, Ordering::SeqCst);
        self.relock.notify_one();
    }

    async fn run_idle_watcher(self: Arc<Self>) {
        loop {
            if !self.unlocked.load(Ordering::SeqCst) {
                return;
            }
            let deadline = self.deadline_unix_secs.load(Ordering::SeqCst);
            let now = now_unix_secs();
            if now >= deadline {
                self.unlocked.store(false, Ordering::SeqCst);
                info!("privacy lock auto-relocked after idle timeout");
                return;
            }
            let wait = Duration::from_secs(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.relock.notified() => {}
            }
        }
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_locked_and_denies_protected_categories() {
        let lock = PrivacyLock::new(1800);
        assert!(!lock.is_unlocked());
        assert!(!lock.is_accessible(FactCategory::Shadow));
        assert!(lock.is_accessible(FactCategory::General));
    }

    #[tokio::test]
    async fn unlock_grants_protected_access_until_locked() {
        let lock = PrivacyLock::new(1800);
        lock.unlock();
        assert!(lock.is_accessible(FactCategory::Vault));
        lock.lock();
        assert!(!lock.is_accessible(FactCategory::Vault));
    }

    #[tokio::test]
    async fn auto_relocks_after_idle_timeout() {
        let lock = PrivacyLock::new(0);
        lock.unlock();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!lock.is_unlocked());
    }
}
