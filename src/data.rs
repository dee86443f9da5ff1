//! Data structures for passing keys and values into and out of a batch.

use std::collections::hash_map::{Entry, HashMap};
use std::hash::Hash;
use std::mem;
use std::num::NonZeroUsize;

use thiserror::Error;

#[repr(transparent)]
#[derive(Debug, PartialEq, Eq, Hash)]
pub(crate) struct Token(NonZeroUsize);

impl Token {
    fn duplicate(&self) -> Self {
        Token(self.0)
    }

    fn index(&self) -> usize {
        self.0.get() - 1
    }
}

/// What to do when a one-to-one batch result carries more than one row for
/// the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDuplicate {
    /// Keep the first row seen for the key and ignore the rest.
    KeepFirst,

    /// Fail the whole batch with [`IntoValuesError::DuplicateKey`].
    Fail,
}

/// Errors returned when a batch result can't be paired with its keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntoValuesError {
    /// A positional result had a different length than the key set.
    #[error("batch function returned {actual} values for {expected} keys")]
    LengthMismatch { expected: usize, actual: usize },

    /// A one-to-one result had more than one row for a single key.
    #[error("batch function returned more than one row for a single key")]
    DuplicateKey,
}

/// A set of keys passed into a batch function. Use the `keys` method
/// to get the set of keys, all of which will be unique and in the order they
/// were first requested, so that you can execute your request. Then, use one
/// of the `into_*` methods to transform your response data into a ValueSet,
/// which is handed back to the batch controller.
#[derive(Debug)]
pub struct KeySet<Key: Eq + Hash> {
    // In order to not require cloneable keys, each key is associated with a
    // Token, held by each future. Tokens are handed out in first-request
    // order, so a token doubles as the key's position in the batch.
    //
    // `waiting` is indexed by token and counts the futures still interested
    // in that key. A count of zero means every requester was dropped and the
    // key should not be fetched. Keys are never removed from `keys`, because
    // token numbering relies on its length.
    keys: HashMap<Key, Token>,
    waiting: Vec<usize>,
}

impl<Key: Eq + Hash> KeySet<Key> {
    pub(crate) fn new() -> Self {
        Self {
            keys: HashMap::new(),
            waiting: Vec::new(),
        }
    }

    /// Add a key to this KeySet, and return the token associated with that
    /// key. This token can then be used to pull a value out of the ValueSet
    /// associated with the key.
    pub(crate) fn add_key(&mut self, key: Key) -> Token {
        let next = self.keys.len() + 1;
        let token = match self.keys.entry(key) {
            Entry::Occupied(entry) => entry.get().duplicate(),
            Entry::Vacant(entry) => {
                // `next` is at least 1
                let token = Token(NonZeroUsize::new(next).unwrap_or(NonZeroUsize::MIN));
                entry.insert(token.duplicate());
                self.waiting.push(0);
                token
            }
        };

        if let Some(count) = self.waiting.get_mut(token.index()) {
            *count += 1;
        }

        token
    }

    pub(crate) fn discard_token(&mut self, token: Token) {
        match self.waiting.get_mut(token.index()) {
            Some(count) if *count > 0 => *count -= 1,
            _ => panic!("Attempted to remove nonexistent token from KeySet"),
        }
    }

    fn is_live(&self, token: &Token) -> bool {
        self.waiting
            .get(token.index())
            .map_or(false, |&count| count > 0)
    }

    /// Check if there are any keys in this keyset
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the number of unique keys in this keyset.
    #[inline]
    pub fn len(&self) -> usize {
        self.waiting.iter().filter(|&&count| count > 0).count()
    }

    fn ordered(&self) -> Vec<(&Key, &Token)> {
        let mut entries: Vec<(&Key, &Token)> = self
            .keys
            .iter()
            .filter(|(_key, token)| self.is_live(token))
            .collect();
        entries.sort_by_key(|(_key, token)| token.index());
        entries
    }

    /// Get an iterator over all the keys in this keyset. These are guaranteed
    /// to be:
    ///
    /// - Unique
    /// - Between 1 and the configured max_keys of the related BatchRules
    /// - In the order in which each key was first requested
    pub fn keys(&self) -> impl Iterator<Item = &Key> + Clone {
        self.ordered().into_iter().map(|(key, _token)| key)
    }

    /// After you've completed your request, use this method to pair each value
    /// in your result with its key.
    pub fn into_values<Value>(self, mut get_value: impl FnMut(&Key) -> Value) -> ValueSet<Value> {
        let mut values = HashMap::with_capacity(self.keys.len());
        for (key, token, count) in self.into_live() {
            let value = get_value(&key);
            values.insert(token, ValueSetEntry { value, count });
        }

        ValueSet { values }
    }

    /// Fallible version of into_values. Same as into_values, but will return
    /// an error the first time `get_value` returns an error.
    pub fn try_into_values<Value, Error>(
        self,
        mut get_value: impl FnMut(&Key) -> Result<Value, Error>,
    ) -> Result<ValueSet<Value>, Error> {
        self.into_live()
            .into_iter()
            .map(move |(key, token, count)| {
                let value = get_value(&key)?;
                Ok((token, ValueSetEntry { value, count }))
            })
            .collect::<Result<HashMap<_, _>, Error>>()
            .map(|values| ValueSet { values })
    }

    /// Pair a positional result with the keys. `values` must have exactly
    /// one entry per key, in the order of [`KeySet::keys`].
    pub fn values_from_vec<Value>(
        self,
        values: Vec<Value>,
    ) -> Result<ValueSet<Value>, IntoValuesError> {
        let live = self.into_live();
        if live.len() != values.len() {
            return Err(IntoValuesError::LengthMismatch {
                expected: live.len(),
                actual: values.len(),
            });
        }

        let values = live
            .into_iter()
            .zip(values)
            .map(|((_key, token, count), value)| (token, ValueSetEntry { value, count }))
            .collect();

        Ok(ValueSet { values })
    }

    /// Build a one-to-one ValueSet from a bulk result. `split` extracts the
    /// key each row belongs to. Keys with no row get `None`; rows for keys
    /// that were never requested are ignored.
    pub fn into_unique<Row, Item>(
        self,
        rows: impl IntoIterator<Item = Row>,
        on_duplicate: OnDuplicate,
        mut split: impl FnMut(Row) -> (Key, Item),
    ) -> Result<ValueSet<Option<Item>>, IntoValuesError> {
        let mut found: HashMap<Key, Item> = HashMap::new();
        for row in rows {
            let (key, item) = split(row);
            match found.entry(key) {
                Entry::Vacant(entry) => {
                    entry.insert(item);
                }
                Entry::Occupied(..) => match on_duplicate {
                    OnDuplicate::KeepFirst => {}
                    OnDuplicate::Fail => return Err(IntoValuesError::DuplicateKey),
                },
            }
        }

        Ok(self.into_values(move |key| found.remove(key)))
    }

    /// Build a one-to-many ValueSet from a bulk result. Rows are partitioned
    /// by the key `split` returns; within a key, rows keep the order the bulk
    /// result had them in. Keys with no rows get an empty Vec.
    pub fn into_groups<Row, Item>(
        self,
        rows: impl IntoIterator<Item = Row>,
        mut split: impl FnMut(Row) -> (Key, Item),
    ) -> ValueSet<Vec<Item>> {
        let mut groups: HashMap<Key, Vec<Item>> = HashMap::new();
        for row in rows {
            let (key, item) = split(row);
            groups.entry(key).or_default().push(item);
        }

        self.into_values(move |key| groups.remove(key).unwrap_or_default())
    }

    /// Consume the key set, yielding each live key with its token and the
    /// number of extra clones its value will need, in request order.
    fn into_live(self) -> Vec<(Key, Token, usize)> {
        let KeySet { keys, waiting } = self;

        let mut live: Vec<(Key, Token, usize)> = keys
            .into_iter()
            .filter_map(|(key, token)| {
                let count = *waiting.get(token.index())?;
                if count == 0 {
                    None
                } else {
                    Some((key, token, count - 1))
                }
            })
            .collect();

        live.sort_by_key(|(_key, token, _count)| token.index());
        live
    }

    /// Take the keyset out of this particular &mut self instance, replacing it
    /// with an empty set. Helper method for when the state transitions out
    /// of Accumulating.
    pub(crate) fn take(&mut self) -> Self {
        Self {
            keys: mem::take(&mut self.keys),
            waiting: mem::take(&mut self.waiting),
        }
    }
}

#[derive(Debug)]
struct ValueSetEntry<Value> {
    // Number of additional futures waiting on this value; in other words, the
    // number of times the value will need to be cloned.
    count: usize,
    value: Value,
}

/// A value set is an opaque data structure that contains the result of a batch
/// operation. It can only be created from a [`KeySet`], and is used by the
/// batch controller to distribute the values to the correct waiting futures.
#[derive(Debug)]
pub struct ValueSet<Value> {
    values: HashMap<Token, ValueSetEntry<Value>>,
}

impl<Value> ValueSet<Value> {
    /// Discard a token associated with this ValueSet without getting the
    /// value. No-op if the token isn't present.
    pub(crate) fn discard(&mut self, token: Token) {
        match self.values.entry(token) {
            Entry::Vacant(..) => {}
            Entry::Occupied(entry) if entry.get().count == 0 => {
                entry.remove();
            }
            Entry::Occupied(mut entry) => {
                entry.get_mut().count -= 1;
            }
        }
    }

    /// Transform every value in the set, keeping the pairing with keys.
    pub fn map<Other>(self, mut f: impl FnMut(Value) -> Other) -> ValueSet<Other> {
        ValueSet {
            values: self
                .values
                .into_iter()
                .map(|(token, entry)| {
                    (
                        token,
                        ValueSetEntry {
                            count: entry.count,
                            value: f(entry.value),
                        },
                    )
                })
                .collect(),
        }
    }
}

impl<Value: Clone> ValueSet<Value> {
    /// Take a value associated with a token out of this ValueSet. If the
    /// count of this token is > 0, the value is cloned.
    ///
    /// This function takes a Token by move, to help ensure that that token
    /// cannot be reused to take the same value again by accident.
    pub(crate) fn take(&mut self, token: Token) -> Option<Value> {
        match self.values.entry(token) {
            Entry::Vacant(..) => None,
            Entry::Occupied(entry) if entry.get().count == 0 => Some(entry.remove().value),
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry.count -= 1;
                Some(entry.value.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyset(keys: &[&'static str]) -> (KeySet<&'static str>, Vec<Token>) {
        let mut set = KeySet::new();
        let tokens = keys.iter().map(|key| set.add_key(*key)).collect();
        (set, tokens)
    }

    #[test]
    fn keys_are_unique_and_in_request_order() {
        let (set, _tokens) = keyset(&["c", "a", "c", "b", "a"]);

        assert_eq!(set.len(), 3);
        assert_eq!(set.keys().copied().collect::<Vec<_>>(), ["c", "a", "b"]);
    }

    #[test]
    fn discarded_keys_are_not_fetched() {
        let (mut set, mut tokens) = keyset(&["a", "b", "b"]);
        let first_b = tokens.remove(1);
        let a = tokens.remove(0);

        set.discard_token(a);
        set.discard_token(first_b);

        assert_eq!(set.keys().copied().collect::<Vec<_>>(), ["b"]);
    }

    #[test]
    fn duplicate_requests_share_one_value() {
        let (set, mut tokens) = keyset(&["a", "a"]);
        let mut values = set.into_values(|key| key.to_uppercase());

        assert_eq!(values.take(tokens.remove(0)).as_deref(), Some("A"));
        assert_eq!(values.take(tokens.remove(0)).as_deref(), Some("A"));
    }

    #[test]
    fn positional_values_must_match_length() {
        let (set, _tokens) = keyset(&["a", "b"]);

        assert_eq!(
            set.values_from_vec(vec![1]).unwrap_err(),
            IntoValuesError::LengthMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn positional_values_follow_key_order() {
        let (set, mut tokens) = keyset(&["x", "y"]);
        let order: Vec<&str> = set.keys().copied().collect();
        let mut values = set
            .values_from_vec(order.iter().map(|key| format!("{}!", key)).collect())
            .unwrap();

        let y = tokens.remove(1);
        assert_eq!(values.take(y).as_deref(), Some("y!"));
        assert_eq!(values.take(tokens.remove(0)).as_deref(), Some("x!"));
    }

    #[test]
    fn unique_rows_are_matched_by_key_not_position() {
        let (set, mut tokens) = keyset(&["one", "two", "three"]);
        let rows = vec![("three", 3), ("one", 1), ("unrequested", 9)];
        let mut values = set
            .into_unique(rows, OnDuplicate::Fail, |row| row)
            .unwrap();

        let three = tokens.remove(2);
        let two = tokens.remove(1);
        assert_eq!(values.take(three), Some(Some(3)));
        assert_eq!(values.take(two), Some(None));
        assert_eq!(values.take(tokens.remove(0)), Some(Some(1)));
    }

    #[test]
    fn unique_rows_reject_duplicates_when_asked() {
        let (set, _tokens) = keyset(&["a"]);
        let rows = vec![("a", 1), ("a", 2)];

        assert_eq!(
            set.into_unique(rows, OnDuplicate::Fail, |row| row).unwrap_err(),
            IntoValuesError::DuplicateKey
        );
    }

    #[test]
    fn groups_are_empty_for_missing_keys() {
        let (set, mut tokens) = keyset(&["a", "b"]);
        let rows = vec![("a", 1), ("a", 2)];
        let mut values = set.into_groups(rows, |row| row);

        let b = tokens.remove(1);
        assert_eq!(values.take(b), Some(vec![]));
        assert_eq!(values.take(tokens.remove(0)), Some(vec![1, 2]));
    }
}
