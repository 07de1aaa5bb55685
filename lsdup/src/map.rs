//! Nonblocking map interface.

use crossbeam_epoch::Guard;

use crate::error::{Error, Rejected};

/// Map whose operations never block each other.
///
/// References returned by `lookup` and `delete` stay valid for as long as `guard` is alive, even
/// if the entry is removed concurrently.
pub trait NonblockingMap<K, V> {
    /// Looks up `key`.
    fn lookup<'a>(&'a self, key: &K, guard: &'a Guard) -> Option<&'a V>;

    /// Inserts `value` under `key`. Fails with `AlreadyExists` if the key is taken, handing
    /// `value` back.
    fn insert(&self, key: &K, value: V, guard: &Guard) -> Result<(), Rejected<V>>;

    /// Deletes `key`, returning its value. Fails with `NotFound` if the key is absent.
    fn delete<'a>(&'a self, key: &K, guard: &'a Guard) -> Result<&'a V, Error>;
}
