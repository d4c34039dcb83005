//! Ordered multi-value map used for headers, query strings, cookies and
//! route parameters.

use std::{collections::BTreeMap, fmt};

/// Error returned by [`MultiDict::get_one`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultiDictError {
    /// No pair with this key exists.
    #[error("key {0:?} is missing")]
    Missing(String),
    /// More than one pair with this key exists while exactly one was asked for.
    #[error("key {0:?} has multiple values")]
    Multiple(String),
}

/// A sequence of `(key, value)` pairs where keys may repeat.
///
/// Iteration order is insertion order. [`add`](MultiDict::add) always
/// appends, [`remove`](MultiDict::remove) drops every pair with the key,
/// and [`len`](MultiDict::len) counts duplicates.
///
/// Header maps are created with [`MultiDict::headers`] and compare keys
/// ASCII case-insensitively, as header names are case-insensitive
/// ([RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
///
/// # Examples
/// ```
/// use maker_rest::MultiDict;
///
/// let mut dict = MultiDict::new();
/// dict.add("a", "1");
/// dict.add("a", "2");
/// dict.add("b", "3");
///
/// assert_eq!(dict.len(), 3);
/// assert_eq!(dict.get("a"), Some("1"));
/// assert!(dict.get_one("a").is_err());
/// assert_eq!(dict.get_all("a").collect::<Vec<_>>(), ["1", "2"]);
///
/// dict.remove("a");
/// assert!(!dict.contains("a"));
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MultiDict {
    items: Vec<(String, String)>,
    ignore_case: bool,
}

impl MultiDict {
    /// Creates an empty map with exact key matching.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty map with ASCII case-insensitive key matching.
    #[inline]
    pub fn headers() -> Self {
        Self {
            items: Vec::new(),
            ignore_case: true,
        }
    }

    #[inline(always)]
    fn matches(&self, stored: &str, key: &str) -> bool {
        match self.ignore_case {
            true => stored.eq_ignore_ascii_case(key),
            false => stored == key,
        }
    }

    /// Number of pairs, duplicates included.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends a pair. Never replaces an existing one.
    #[inline]
    pub fn add<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.items.push((key.into(), value.into()));
    }

    /// Returns the first value for `key`.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(k, _)| self.matches(k, key))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the value for `key` when exactly one pair has it.
    pub fn get_one(&self, key: &str) -> Result<&str, MultiDictError> {
        let mut iter = self
            .items
            .iter()
            .filter(|(k, _)| self.matches(k, key))
            .map(|(_, v)| v.as_str());

        let first = iter
            .next()
            .ok_or_else(|| MultiDictError::Missing(key.to_owned()))?;

        match iter.next() {
            Some(_) => Err(MultiDictError::Multiple(key.to_owned())),
            None => Ok(first),
        }
    }

    /// Returns every value for `key` in insertion order without mutating the map.
    #[inline]
    pub fn get_all<'a, 'k>(&'a self, key: &'k str) -> impl Iterator<Item = &'a str> + 'k
    where
        'a: 'k,
    {
        self.items
            .iter()
            .filter(move |(k, _)| self.matches(k, key))
            .map(|(_, v)| v.as_str())
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.items.iter().any(|(k, _)| self.matches(k, key))
    }

    /// Removes all pairs with `key` and returns how many were removed.
    pub fn remove(&mut self, key: &str) -> usize {
        let before = self.items.len();
        let ignore_case = self.ignore_case;

        self.items.retain(|(k, _)| match ignore_case {
            true => !k.eq_ignore_ascii_case(key),
            false => k != key,
        });

        before - self.items.len()
    }

    /// Removes all pairs with `key` and returns the first value.
    pub fn pop(&mut self, key: &str) -> Option<String> {
        let position = self.items.iter().position(|(k, _)| self.matches(k, key))?;
        let (_, value) = self.items.remove(position);
        self.remove(key);
        Some(value)
    }

    /// Replaces every pair with `key` by a single pair.
    ///
    /// The new pair takes the position of the first removed one, or is
    /// appended when the key was absent.
    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();

        match self.items.iter().position(|(k, _)| self.matches(k, &key)) {
            Some(position) => {
                self.items[position].1 = value;

                let mut index = 0;
                let ignore_case = self.ignore_case;
                self.items.retain(|(k, _)| {
                    let keep = index <= position
                        || match ignore_case {
                            true => !k.eq_ignore_ascii_case(&key),
                            false => *k != key,
                        };
                    index += 1;
                    keep
                });
            }
            None => self.items.push((key, value)),
        }
    }

    /// Returns the first value for `key`, inserting `default` when absent.
    pub fn set_default<K: Into<String>, V: Into<String>>(&mut self, key: K, default: V) -> &str {
        let key = key.into();

        let position = match self.items.iter().position(|(k, _)| self.matches(k, &key)) {
            Some(position) => position,
            None => {
                self.items.push((key, default.into()));
                self.items.len() - 1
            }
        };

        &self.items[position].1
    }

    /// Appends all pairs from `iter`.
    pub fn extend<I, K, V>(&mut self, iter: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.items
            .extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    #[inline]
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterates over all pairs in insertion order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Unique keys in first-seen order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for (key, _) in &self.items {
            if !keys.iter().any(|seen| self.matches(seen, key)) {
                keys.push(key);
            }
        }
        keys
    }

    /// All values in insertion order.
    #[inline]
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|(_, v)| v.as_str())
    }

    /// Groups values by key. Keys keep the spelling of their first occurrence.
    pub fn to_lists(&self) -> BTreeMap<String, Vec<String>> {
        let mut result = BTreeMap::new();
        for key in self.keys() {
            let values = self.get_all(key).map(str::to_owned).collect();
            result.insert(key.to_owned(), values);
        }
        result
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MultiDict {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut dict = MultiDict::new();
        dict.extend(iter);
        dict
    }
}

impl fmt::Debug for MultiDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MultiDict(")?;
        f.debug_list()
            .entries(self.items.iter().map(|(k, v)| match k.eq_ignore_ascii_case("password") {
                true => (k.as_str(), "******"),
                false => (k.as_str(), v.as_str()),
            }))
            .finish()?;
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MultiDict {
        [("a", "\u{e9}"), ("a", "e"), ("a", "f"), ("b", "1")]
            .into_iter()
            .collect()
    }

    #[test]
    fn len_counts_duplicates() {
        assert_eq!(sample().len(), 4);
        assert!(!sample().is_empty());
        assert!(MultiDict::new().is_empty());
    }

    #[test]
    fn get_one() {
        let d = sample();

        assert_eq!(d.get_one("b"), Ok("1"));
        assert_eq!(d.get_one("z"), Err(MultiDictError::Missing("z".into())));
        assert_eq!(d.get_one("a"), Err(MultiDictError::Multiple("a".into())));
        assert_eq!(d.get("a"), Some("\u{e9}"));
    }

    #[test]
    fn values_outlive_the_key() {
        let d = sample();

        let (one, all) = {
            let single = String::from("b");
            let repeated = String::from("a");
            (d.get_one(&single), d.get_all(&repeated).collect::<Vec<_>>())
        };

        assert_eq!(one, Ok("1"));
        assert_eq!(all, ["\u{e9}", "e", "f"]);
    }

    #[test]
    fn get_all_in_insertion_order() {
        let d = sample();

        assert_eq!(d.get_all("a").collect::<Vec<_>>(), ["\u{e9}", "e", "f"]);
        assert_eq!(d.get_all("b").collect::<Vec<_>>(), ["1"]);
        assert_eq!(d.get_all("z").count(), 0);
        assert_eq!(d, sample());
    }

    #[test]
    fn interleaved_duplicates() {
        #[rustfmt::skip]
        let cases = [
            (vec![("x", "1"), ("y", "2"), ("x", "3")], "x", vec!["1", "3"]),
            (vec![("x", "1"), ("x", "2"), ("x", "3")], "x", vec!["1", "2", "3"]),
            (vec![("y", "1"), ("x", "2"), ("y", "3")], "y", vec!["1", "3"]),
            (vec![("y", "1")],                         "x", vec![]),
        ];

        for (pairs, key, expected) in cases {
            let d: MultiDict = pairs.into_iter().collect();
            assert_eq!(d.get_all(key).collect::<Vec<_>>(), expected);
        }
    }

    #[test]
    fn to_lists() {
        let lists = sample().to_lists();

        assert_eq!(lists["a"], ["\u{e9}", "e", "f"]);
        assert_eq!(lists["b"], ["1"]);
    }

    #[test]
    fn views() {
        let d = sample();

        assert_eq!(d.keys(), ["a", "b"]);
        assert!(d.values().any(|v| v == "1"));
        assert!(d.iter().any(|pair| pair == ("b", "1")));
    }

    #[test]
    fn remove_drops_all_pairs() {
        let mut d = sample();

        assert!(d.contains("a"));
        assert_eq!(d.remove("a"), 3);
        assert!(!d.contains("a"));
        assert_eq!(d.len(), 1);
        assert_eq!(d.remove("a"), 0);
    }

    #[test]
    fn pop() {
        let mut d = sample();

        assert_eq!(d.pop("a").as_deref(), Some("\u{e9}"));
        assert!(!d.contains("a"));
        assert_eq!(d.pop("x"), None);
    }

    #[test]
    fn set_replaces_every_pair() {
        let mut d: MultiDict = [("a", "1"), ("b", "2"), ("a", "3")].into_iter().collect();

        d.set("a", "9");
        assert_eq!(d.iter().collect::<Vec<_>>(), [("a", "9"), ("b", "2")]);

        d.set("c", "4");
        assert_eq!(d.get_one("c"), Ok("4"));
    }

    #[test]
    fn set_default() {
        let mut d = sample();

        assert_eq!(d.set_default("a", "1"), "\u{e9}");
        assert_eq!(d.set_default("e", "1"), "1");
        assert!(d.contains("e"));
    }

    #[test]
    fn add_appends() {
        let mut d: MultiDict = [("a", "1")].into_iter().collect();
        d.add("a", "2");
        assert_eq!(d.get_all("a").collect::<Vec<_>>(), ["1", "2"]);

        let mut d = sample();
        d.add("b", "3");
        assert_eq!(d.get_all("b").collect::<Vec<_>>(), ["1", "3"]);
    }

    #[test]
    fn extend_and_clear() {
        let mut d = sample();

        d.extend([("e", "1"), ("x", "1")]);
        assert!(d.contains("e") && d.contains("x"));

        d.clear();
        assert_eq!(d.len(), 0);
        assert!(d.is_empty());
    }

    #[test]
    fn header_keys_ignore_case() {
        let mut d = MultiDict::headers();
        d.add("Content-Type", "application/json");
        d.add("X-Tag", "a");
        d.add("x-tag", "b");

        assert_eq!(d.get("content-type"), Some("application/json"));
        assert_eq!(d.get_all("X-TAG").collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(d.keys(), ["Content-Type", "X-Tag"]);

        assert_eq!(d.remove("X-TAG"), 2);
        assert!(!d.contains("x-tag"));

        let plain: MultiDict = [("Key", "1")].into_iter().collect();
        assert_eq!(plain.get("key"), None);
    }

    #[test]
    fn debug_masks_password() {
        let d: MultiDict = [("password", "pwd")].into_iter().collect();
        assert_eq!(format!("{d:?}"), r#"MultiDict([("password", "******")])"#);
    }
}
