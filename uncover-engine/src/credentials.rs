//! API credentials: per-run key snapshots and the rotating key pool.
//!
//! A [`Provider`] holds a *list* of credentials per source. Every call to
//! [`Provider::get_keys`] draws one entry per source uniformly at random,
//! spreading load across a pool of API keys with no cross-call affinity.
//! The random source is owned by the provider so tests can seed it.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// One credential snapshot, one slot per supported source.
///
/// Paired credentials (`censys`, `fofa`, `google`) are stored split.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keys {
    /// Shodan API key.
    pub shodan: String,
    /// Censys API ID.
    pub censys_token: String,
    /// Censys API secret.
    pub censys_secret: String,
    /// Account email paired with `fofa_key`.
    pub fofa_email: String,
    /// FOFA API key.
    pub fofa_key: String,
    /// 360 Quake token.
    pub quake_token: String,
    /// Hunter API key.
    pub hunter_token: String,
    /// ZoomEye API key.
    pub zoomeye_token: String,
    /// Netlas API key.
    pub netlas_token: String,
    /// Criminal IP API key.
    pub criminalip_token: String,
    /// PublicWWW API key.
    pub publicwww_token: String,
    /// Hunter.how API key.
    pub hunterhow_token: String,
    /// Google Custom Search API key.
    pub google_key: String,
    /// Google search engine id paired with `google_key`.
    pub google_cx: String,
}

impl Keys {
    /// Returns `true` iff every slot is unset.
    pub fn is_empty(&self) -> bool {
        [
            &self.shodan,
            &self.censys_token,
            &self.censys_secret,
            &self.fofa_email,
            &self.fofa_key,
            &self.quake_token,
            &self.hunter_token,
            &self.zoomeye_token,
            &self.netlas_token,
            &self.criminalip_token,
            &self.publicwww_token,
            &self.hunterhow_token,
            &self.google_key,
            &self.google_cx,
        ]
        .iter()
        .all(|slot| slot.is_empty())
    }
}

/// Per-source credential pools as stored in configuration.
///
/// Paired credentials are written `first:second`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPools {
    /// Shodan API keys.
    pub shodan: Vec<String>,
    /// `api_id:secret` pairs.
    pub censys: Vec<String>,
    /// `email:key` pairs.
    pub fofa: Vec<String>,
    /// 360 Quake tokens.
    pub quake: Vec<String>,
    /// Hunter API keys.
    pub hunter: Vec<String>,
    /// ZoomEye API keys.
    pub zoomeye: Vec<String>,
    /// Netlas API keys.
    pub netlas: Vec<String>,
    /// Criminal IP API keys.
    pub criminalip: Vec<String>,
    /// PublicWWW API keys.
    pub publicwww: Vec<String>,
    /// Hunter.how API keys.
    pub hunterhow: Vec<String>,
    /// `api_key:cx` pairs.
    pub google: Vec<String>,
}

impl KeyPools {
    fn all(&self) -> [&Vec<String>; 11] {
        [
            &self.shodan,
            &self.censys,
            &self.fofa,
            &self.quake,
            &self.hunter,
            &self.zoomeye,
            &self.netlas,
            &self.criminalip,
            &self.publicwww,
            &self.hunterhow,
            &self.google,
        ]
    }

    /// Add every entry from `other` to the matching pool.
    pub fn extend(&mut self, other: KeyPools) {
        self.shodan.extend(other.shodan);
        self.censys.extend(other.censys);
        self.fofa.extend(other.fofa);
        self.quake.extend(other.quake);
        self.hunter.extend(other.hunter);
        self.zoomeye.extend(other.zoomeye);
        self.netlas.extend(other.netlas);
        self.criminalip.extend(other.criminalip);
        self.publicwww.extend(other.publicwww);
        self.hunterhow.extend(other.hunterhow);
        self.google.extend(other.google);
    }
}

/// Credential pool manager with randomized per-call key rotation.
#[derive(Debug)]
pub struct Provider {
    pools: KeyPools,
    rng: Mutex<StdRng>,
}

impl Provider {
    /// Create a provider seeded from OS entropy.
    pub fn new(pools: KeyPools) -> Self {
        Self {
            pools,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a provider with a deterministic random source.
    pub fn with_seed(pools: KeyPools, seed: u64) -> Self {
        Self {
            pools,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Returns `true` if at least one source has a configured credential.
    pub fn has_keys(&self) -> bool {
        self.pools.all().iter().any(|pool| !pool.is_empty())
    }

    /// Draw one credential per source, uniformly at random.
    ///
    /// Malformed paired entries (missing the `:` separator) leave their
    /// slots unset.
    pub fn get_keys(&self) -> Keys {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut pick = |pool: &[String]| -> Option<String> {
            if pool.is_empty() {
                None
            } else {
                Some(pool[rng.gen_range(0..pool.len())].clone())
            }
        };

        let mut keys = Keys::default();
        if let Some(key) = pick(&self.pools.shodan) {
            keys.shodan = key;
        }
        if let Some((token, secret)) = pick(&self.pools.censys).and_then(split_pair) {
            keys.censys_token = token;
            keys.censys_secret = secret;
        }
        if let Some((email, key)) = pick(&self.pools.fofa).and_then(split_pair) {
            keys.fofa_email = email;
            keys.fofa_key = key;
        }
        if let Some(key) = pick(&self.pools.quake) {
            keys.quake_token = key;
        }
        if let Some(key) = pick(&self.pools.hunter) {
            keys.hunter_token = key;
        }
        if let Some(key) = pick(&self.pools.zoomeye) {
            keys.zoomeye_token = key;
        }
        if let Some(key) = pick(&self.pools.netlas) {
            keys.netlas_token = key;
        }
        if let Some(key) = pick(&self.pools.criminalip) {
            keys.criminalip_token = key;
        }
        if let Some(key) = pick(&self.pools.publicwww) {
            keys.publicwww_token = key;
        }
        if let Some(key) = pick(&self.pools.hunterhow) {
            keys.hunterhow_token = key;
        }
        if let Some((key, cx)) = pick(&self.pools.google).and_then(split_pair) {
            keys.google_key = key;
            keys.google_cx = cx;
        }
        keys
    }
}

impl Default for Provider {
    fn default() -> Self {
        Self::new(KeyPools::default())
    }
}

fn split_pair(entry: String) -> Option<(String, String)> {
    let (first, second) = entry.split_once(':')?;
    if first.is_empty() || second.is_empty() {
        return None;
    }
    Some((first.to_owned(), second.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn default_keys_are_empty() {
        assert!(Keys::default().is_empty());
    }

    #[test]
    fn any_slot_makes_keys_non_empty() {
        let keys = Keys {
            google_cx: "cx".into(),
            ..Default::default()
        };
        assert!(!keys.is_empty());
    }

    #[test]
    fn empty_provider_has_no_keys() {
        let provider = Provider::default();
        assert!(!provider.has_keys());
        assert!(provider.get_keys().is_empty());
    }

    #[test]
    fn single_source_pool_has_keys() {
        let provider = Provider::new(KeyPools {
            netlas: vec!["nl-key".into()],
            ..Default::default()
        });
        assert!(provider.has_keys());
        assert_eq!(provider.get_keys().netlas_token, "nl-key");
    }

    #[test]
    fn paired_credentials_are_split() {
        let provider = Provider::new(KeyPools {
            fofa: vec!["me@example.com:fofa-key".into()],
            censys: vec!["id:secret".into()],
            ..Default::default()
        });
        let keys = provider.get_keys();
        assert_eq!(keys.fofa_email, "me@example.com");
        assert_eq!(keys.fofa_key, "fofa-key");
        assert_eq!(keys.censys_token, "id");
        assert_eq!(keys.censys_secret, "secret");
    }

    #[test]
    fn malformed_pair_leaves_slots_unset() {
        let provider = Provider::new(KeyPools {
            fofa: vec!["no-separator".into()],
            ..Default::default()
        });
        let keys = provider.get_keys();
        assert!(keys.fofa_email.is_empty());
        assert!(keys.fofa_key.is_empty());
        assert!(provider.has_keys());
    }

    #[test]
    fn rotation_draws_from_whole_pool() {
        let provider = Provider::with_seed(
            KeyPools {
                shodan: vec!["a".into(), "b".into(), "c".into()],
                ..Default::default()
            },
            7,
        );
        let seen: HashSet<String> = (0..200).map(|_| provider.get_keys().shodan).collect();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn same_seed_gives_same_sequence() {
        let pools = KeyPools {
            shodan: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            ..Default::default()
        };
        let first = Provider::with_seed(pools.clone(), 42);
        let second = Provider::with_seed(pools, 42);
        for _ in 0..20 {
            assert_eq!(first.get_keys().shodan, second.get_keys().shodan);
        }
    }

    #[test]
    fn pools_extend_appends() {
        let mut pools = KeyPools {
            shodan: vec!["file-key".into()],
            ..Default::default()
        };
        pools.extend(KeyPools {
            shodan: vec!["env-key".into()],
            quake: vec!["quake".into()],
            ..Default::default()
        });
        assert_eq!(pools.shodan, vec!["file-key", "env-key"]);
        assert_eq!(pools.quake, vec!["quake"]);
    }
}
