//! Account registry: the set of loaded account records keyed by
//! shortname, with an auxiliary used-state index.
//!
//! Exposes two permanent lookup methods rather than a runtime-swappable
//! match predicate: callers look up by shortname or by outstanding-state
//! nonce through dedicated methods, never through a callable the
//! registry would need to temporarily reassign and restore.

use dashmap::DashMap;

use crate::account::Account;
use crate::error::{Error, Result};
use crate::secret::SecretKey;

/// Shortname-keyed store of loaded accounts.
///
/// Ownership: the registry exclusively owns its records. Callers
/// operate on them through `with_*` closures rather than holding a
/// reference across an `.await` point, keeping the single-threaded
/// dispatcher's non-escaping-borrow discipline.
#[derive(Default)]
pub struct AccountRegistry {
    accounts: DashMap<String, Account>,
}

impl AccountRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    #[must_use]
    pub fn contains(&self, shortname: &str) -> bool {
        self.accounts.contains_key(shortname)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Insert a new record. Fails with `AlreadyLoaded` if the
    /// shortname is already present — callers that want idempotent
    /// re-add must check [`AccountRegistry::contains`]
    /// first and call [`AccountRegistry::with_mut`] instead.
    pub fn insert_new(&self, account: Account) -> Result<()> {
        if self.accounts.contains_key(&account.shortname) {
            return Err(Error::AlreadyLoaded(account.shortname.clone()));
        }
        self.accounts.insert(account.shortname.clone(), account);
        Ok(())
    }

    /// Insert or replace unconditionally (used by `gen` completion and
    /// by the dispatcher's housekeeping/lock transitions).
    pub fn upsert(&self, account: Account) {
        self.accounts.insert(account.shortname.clone(), account);
    }

    /// Remove by shortname. Returns the removed record, or
    /// `NotLoaded` if absent.
    pub fn remove(&self, shortname: &str) -> Result<Account> {
        self.accounts
            .remove(shortname)
            .map(|(_, account)| account)
            .ok_or_else(|| Error::NotLoaded(shortname.to_string()))
    }

    /// Atomically replace the registry with an empty one, zeroizing
    /// every record's secret buffers first.
    pub fn remove_all(&self) {
        self.accounts.retain(|_, account| {
            account.zeroize_secrets();
            false
        });
    }

    /// Run `f` with shared access to the record named `shortname`.
    pub fn with<T>(&self, shortname: &str, f: impl FnOnce(&Account) -> T) -> Result<T> {
        self.accounts
            .get(shortname)
            .map(|entry| f(&entry))
            .ok_or_else(|| Error::NotLoaded(shortname.to_string()))
    }

    /// Run `f` with exclusive access to the record named `shortname`.
    pub fn with_mut<T>(&self, shortname: &str, f: impl FnOnce(&mut Account) -> T) -> Result<T> {
        self.accounts
            .get_mut(shortname)
            .map(|mut entry| f(&mut entry))
            .ok_or_else(|| Error::NotLoaded(shortname.to_string()))
    }

    /// Find the shortname whose [`Account::outstanding_code_flow`]
    /// carries the given `state` nonce. A linear scan over the
    /// secondary index rather than a swapped match callable.
    #[must_use]
    pub fn find_by_outstanding_state(&self, state: &str) -> Option<String> {
        self.accounts.iter().find_map(|entry| {
            entry
                .outstanding_code_flow
                .as_ref()
                .filter(|flow| flow.state == state)
                .map(|_| entry.key().clone())
        })
    }

    /// Every currently-loaded shortname, for the `list` request kind.
    #[must_use]
    pub fn shortnames(&self) -> Vec<String> {
        self.accounts.iter().map(|e| e.key().clone()).collect()
    }

    /// Evict every record whose `death` is nonzero and has passed.
    /// Returns the evicted shortnames.
    pub fn evict_expired(&self, now: u64) -> Vec<String> {
        let mut evicted = Vec::new();
        self.accounts.retain(|shortname, account| {
            if account.is_expired(now) {
                account.zeroize_secrets();
                evicted.push(shortname.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Transition every record's secrets to hidden (agent lock).
    pub fn hide_all_secrets(&self, key: &SecretKey) -> Result<()> {
        for mut entry in self.accounts.iter_mut() {
            entry.hide_secrets(key)?;
        }
        Ok(())
    }

    /// Transition every record's secrets back to plain (agent unlock).
    pub fn reveal_all_secrets(&self, key: &SecretKey) -> Result<()> {
        for mut entry in self.accounts.iter_mut() {
            entry.reveal_secrets(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_new_rejects_duplicate_shortname() {
        let registry = AccountRegistry::new();
        registry
            .insert_new(Account::new("acme", "https://issuer.example/"))
            .unwrap();
        let err = registry
            .insert_new(Account::new("acme", "https://issuer.example/"))
            .unwrap_err();
        assert_eq!(err.kind(), "already_loaded");
    }

    #[test]
    fn remove_then_add_restores_empty_registry() {
        let registry = AccountRegistry::new();
        registry
            .insert_new(Account::new("acme", "https://issuer.example/"))
            .unwrap();
        registry.remove("acme").unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_absent_is_not_loaded() {
        let registry = AccountRegistry::new();
        let err = registry.remove("nope").unwrap_err();
        assert_eq!(err.kind(), "not_loaded");
    }

    #[test]
    fn find_by_outstanding_state_locates_the_right_account() {
        let registry = AccountRegistry::new();
        let mut acc = Account::new("acme", "https://issuer.example/");
        acc.outstanding_code_flow = Some(crate::account::OutstandingCodeFlow {
            state: "S1".into(),
            code_verifier: "v".into(),
            redirect_uri: "https://cb/".into(),
        });
        registry.insert_new(acc).unwrap();
        assert_eq!(
            registry.find_by_outstanding_state("S1"),
            Some("acme".to_string())
        );
        assert_eq!(registry.find_by_outstanding_state("unknown"), None);
    }

    #[test]
    fn evict_expired_zeroizes_and_removes() {
        let registry = AccountRegistry::new();
        let mut acc = Account::new("acme", "https://issuer.example/");
        acc.death = 100;
        registry.insert_new(acc).unwrap();
        let evicted = registry.evict_expired(200);
        assert_eq!(evicted, vec!["acme".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_all_zeroizes_every_record() {
        let registry = AccountRegistry::new();
        registry
            .insert_new(Account::new("a", "https://issuer.example/"))
            .unwrap();
        registry
            .insert_new(Account::new("b", "https://issuer.example/"))
            .unwrap();
        registry.remove_all();
        assert!(registry.is_empty());
    }
}
