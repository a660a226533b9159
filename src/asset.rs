use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::HashSet, fmt, sync::Mutex};

// Flyweight pattern
// Leaks memory if and only if no name with the same contents was interned before.
// This allows us to pass names around as static strs, which in turn
// enables implementing Copy for assets, venues and symbols.
pub(crate) fn intern<R: AsRef<str>>(name: R) -> &'static str {
    static SET: Lazy<Mutex<HashSet<&'static str>>> = Lazy::new(|| Mutex::new(HashSet::new()));
    let mut set = match SET.lock() {
        Ok(set) => set,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(interned) = set.get(name.as_ref()) {
        return interned;
    }
    let leaked: &'static str = Box::leak(name.as_ref().to_owned().into_boxed_str());
    set.insert(leaked);
    leaked
}

/// A currency or coin, always upper case ("BTC", "USDT").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Asset(&'static str);

impl<'de> Deserialize<'de> for Asset {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Asset::new)
    }
}

impl Asset {
    pub fn new<R: AsRef<str>>(name: R) -> Self {
        Asset(intern(name.as_ref().trim().to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation() {
        let asset1 = Asset::new("BTC");
        let asset2 = Asset::new("btc");
        let asset3 = Asset::new("ETH");
        assert!(std::ptr::eq(asset1.0, asset2.0));
        assert!(!std::ptr::eq(asset1.0, asset3.0));
    }

    #[test]
    fn interned_names_are_shared() {
        let a = intern("BTCUSDT");
        let b = intern(String::from("BTCUSDT"));
        assert!(std::ptr::eq(a, b));
    }
}
