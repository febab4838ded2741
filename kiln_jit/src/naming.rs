//! Process-wide unit name uniquification.
//!
//! Every generated unit gets a unique name: the first unit for a base name
//! keeps it, later ones get `base$$N` with `N` counting from 1.
//!
//! A `$` inside the base is written as `$_`, so `$$` only ever starts the
//! uniquifying suffix and a qualname ending in `$$1` cannot collide with a
//! generated name.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::borrow::Cow;
use std::sync::{Arc, LazyLock};

static NAME_COUNTERS: LazyLock<Mutex<FxHashMap<String, u64>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

/// Reserve a unique unit name derived from `base`.
#[must_use]
pub fn unique_name(base: &str) -> Arc<str> {
    let base = escape(base);
    let count = {
        let mut counters = NAME_COUNTERS.lock();
        let counter = counters.entry(base.to_string()).or_insert(0);
        let current = *counter;
        *counter += 1;
        current
    };
    if count == 0 {
        Arc::from(&*base)
    } else {
        Arc::from(format!("{base}$${count}"))
    }
}

/// Strip a uniquifying suffix, recovering the original base.
#[must_use]
pub fn base_name(unit_name: &str) -> Cow<'_, str> {
    let base = match unit_name.rfind("$$") {
        Some(at) if unit_name[at + 2..].bytes().all(|b| b.is_ascii_digit()) && at + 2 < unit_name.len() => {
            &unit_name[..at]
        }
        _ => unit_name,
    };
    if base.contains("$_") {
        Cow::Owned(base.replace("$_", "$"))
    } else {
        Cow::Borrowed(base)
    }
}

fn escape(base: &str) -> Cow<'_, str> {
    if base.contains('$') {
        Cow::Owned(base.replace('$', "$_"))
    } else {
        Cow::Borrowed(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_use_keeps_base() {
        let first = unique_name("naming_test_first");
        let second = unique_name("naming_test_first");
        let third = unique_name("naming_test_first");
        assert_eq!(&*first, "naming_test_first");
        assert_eq!(&*second, "naming_test_first$$1");
        assert_eq!(&*third, "naming_test_first$$2");
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("f$$3"), "f");
        assert_eq!(base_name("f"), "f");
        assert_eq!(base_name("f$$"), "f$$");
        assert_eq!(base_name("f$$x"), "f$$x");
        assert_eq!(base_name("cost$_total$$2"), "cost$total");
    }

    #[test]
    fn test_dollar_in_base_cannot_collide() {
        let plain = unique_name("naming_test_dollar");
        let generated = unique_name("naming_test_dollar");
        let lookalike = unique_name("naming_test_dollar$$1");
        assert_eq!(&*plain, "naming_test_dollar");
        assert_eq!(&*generated, "naming_test_dollar$$1");
        assert_ne!(lookalike, generated);
        assert_eq!(base_name(&lookalike), "naming_test_dollar$$1");
        assert_eq!(base_name(&generated), "naming_test_dollar");
    }
}
