//! Shared container values: lists, dicts and tuples

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Freeze, Value, ValueError};

/// Interior state shared by every handle to one container
struct Shared<T> {
    frozen: AtomicBool,
    items: RwLock<T>,
}

impl<T> Shared<T> {
    fn new(items: T) -> Self {
        Self {
            frozen: AtomicBool::new(false),
            items: RwLock::new(items),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, T> {
        self.items.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the write lock, failing if the container is frozen.
    ///
    /// The flag is checked under the lock so a mutation never lands after `freeze` has
    /// walked the children.
    fn write(&self, op: &'static str) -> Result<RwLockWriteGuard<'_, T>, ValueError> {
        let guard = self.items.write().unwrap_or_else(PoisonError::into_inner);
        if self.frozen.load(Ordering::Acquire) {
            return Err(ValueError::Frozen { op });
        }
        Ok(guard)
    }

    /// Mark frozen; returns false if it already was (stops recursion on cycles)
    fn mark_frozen(&self) -> bool {
        !self.frozen.swap(true, Ordering::AcqRel)
    }

    fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

thread_local! {
    /// Containers being formatted, compared or serialized on this thread
    static VISITING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a container as on the current traversal path until dropped
///
/// `enter` returns `None` when the container is already on the path, which is
/// how a container that (indirectly) holds itself is detected.
pub(crate) struct Visit(usize);

impl Visit {
    fn enter<T>(shared: &Arc<Shared<T>>) -> Option<Self> {
        let addr = Arc::as_ptr(shared) as *const () as usize;
        VISITING.with(|path| {
            let mut path = path.borrow_mut();
            if path.contains(&addr) {
                return None;
            }
            path.push(addr);
            Some(Visit(addr))
        })
    }
}

impl Drop for Visit {
    fn drop(&mut self) {
        VISITING.with(|path| {
            let mut path = path.borrow_mut();
            if let Some(pos) = path.iter().rposition(|addr| *addr == self.0) {
                path.remove(pos);
            }
        });
    }
}

/// A mutable, shared list of values
#[derive(Clone)]
pub struct List(Arc<Shared<Vec<Value>>>);

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        Self(Arc::new(Shared::new(items)))
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.read().get(index).cloned()
    }

    /// Snapshot of the current elements
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.read().clone()
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<(), ValueError> {
        self.0.write("append")?.push(value.into());
        Ok(())
    }

    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<(), ValueError> {
        let mut items = self.0.write("assign")?;
        let len = items.len();
        let slot = items.get_mut(index).ok_or(ValueError::IndexOutOfRange { index, len })?;
        *slot = value.into();
        Ok(())
    }

    pub fn pop(&self) -> Result<Option<Value>, ValueError> {
        Ok(self.0.write("pop")?.pop())
    }

    pub fn clear(&self) -> Result<(), ValueError> {
        self.0.write("clear")?.clear();
        Ok(())
    }

    /// Check if both handles point at the same list
    pub fn ptr_eq(&self, other: &List) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Put this list on the traversal path; `None` if it is already there
    pub(crate) fn visit(&self) -> Option<Visit> {
        Visit::enter(&self.0)
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Freeze for List {
    fn freeze(&self) {
        if self.0.mark_frozen() {
            for item in self.0.read().iter() {
                item.freeze();
            }
        }
    }

    fn is_frozen(&self) -> bool {
        self.0.is_frozen()
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        // a distinct list reached again through itself never compares equal
        let Some(_visit) = self.visit() else {
            return false;
        };
        let ours = self.to_vec();
        let theirs = other.to_vec();
        ours == theirs
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(_visit) = self.visit() else {
            return write!(f, "[...]");
        };
        f.debug_list().entries(self.0.read().iter()).finish()
    }
}

impl fmt::Display for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(_visit) = self.visit() else {
            return write!(f, "[...]");
        };
        write!(f, "[")?;
        for (i, item) in self.0.read().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", item)?;
        }
        write!(f, "]")
    }
}

impl From<Vec<Value>> for List {
    fn from(items: Vec<Value>) -> Self {
        Self::new(items)
    }
}

/// A mutable, shared mapping from string keys to values, iterated in key order
#[derive(Clone)]
pub struct Dict(Arc<Shared<BTreeMap<String, Value>>>);

impl Dict {
    pub fn new() -> Self {
        Self(Arc::new(Shared::new(BTreeMap::new())))
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.read().get(key).cloned()
    }

    /// Snapshot of the entries in key order
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<Option<Value>, ValueError> {
        Ok(self.0.write("insert")?.insert(key.into(), value.into()))
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>, ValueError> {
        Ok(self.0.write("remove")?.remove(key))
    }

    pub fn ptr_eq(&self, other: &Dict) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Put this dict on the traversal path; `None` if it is already there
    pub(crate) fn visit(&self) -> Option<Visit> {
        Visit::enter(&self.0)
    }
}

impl Default for Dict {
    fn default() -> Self {
        Self::new()
    }
}

impl Freeze for Dict {
    fn freeze(&self) {
        if self.0.mark_frozen() {
            for value in self.0.read().values() {
                value.freeze();
            }
        }
    }

    fn is_frozen(&self) -> bool {
        self.0.is_frozen()
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let Some(_visit) = self.visit() else {
            return false;
        };
        self.entries() == other.entries()
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(_visit) = self.visit() else {
            return write!(f, "{{...}}");
        };
        f.debug_map().entries(self.0.read().iter()).finish()
    }
}

impl fmt::Display for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(_visit) = self.visit() else {
            return write!(f, "{{...}}");
        };
        write!(f, "{{")?;
        for (i, (key, value)) in self.0.read().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}: {}", key, value)?;
        }
        write!(f, "}}")
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Dict {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self(Arc::new(Shared::new(map)))
    }
}

/// A fixed sequence of values. The tuple itself never changes; freezing it
/// freezes its elements.
#[derive(Clone, PartialEq)]
pub struct Tuple(Arc<[Value]>);

impl Tuple {
    pub fn new(items: Vec<Value>) -> Self {
        Self(items.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }
}

impl Freeze for Tuple {
    fn freeze(&self) {
        for item in self.0.iter() {
            item.freeze();
        }
    }

    fn is_frozen(&self) -> bool {
        self.0.iter().all(Freeze::is_frozen)
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tuple = f.debug_tuple("");
        for item in self.0.iter() {
            tuple.field(item);
        }
        tuple.finish()
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", item)?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(items: Vec<Value>) -> Self {
        Self::new(items)
    }
}
