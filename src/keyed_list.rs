use std::{
    fmt::{self, Debug, Display},
    hash::Hash,
};

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};

use crate::state::LinkStatus;

pub trait Field: Copy + Eq + Debug + 'static {
    fn name(self) -> &'static str;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Integer(i64),
    Flag(bool),
    Status(LinkStatus),
}

impl Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Integer(value) => write!(f, "{value}"),
            FieldValue::Flag(value) => write!(f, "{value}"),
            FieldValue::Status(status) => f.write_str(status.label()),
        }
    }
}

/// A row type held by a [`KeyedList`]: a stable identity plus a closed set of
/// typed fields that can be read by name and mutated through `Update` values.
pub trait Entity {
    type Key: Clone + Eq + Hash + Debug;
    type Field: Field;
    type Update: Debug;

    const FIELDS: &'static [Self::Field];

    fn key(&self) -> Self::Key;

    fn has_key(&self, key: &Self::Key) -> bool {
        self.key() == *key
    }

    fn value(&self, field: Self::Field) -> FieldValue<'_>;

    fn apply(&mut self, update: Self::Update) -> Self::Field;

    /// Updates for the fields a remote snapshot owns. Client-only fields are
    /// never part of the result.
    fn snapshot_updates(&self, _fresh: &Self) -> Vec<Self::Update> {
        Vec::new()
    }
}

/// Renders every field as `name=value`, in declaration order.
pub fn describe<T: Entity>(item: &T) -> String {
    T::FIELDS
        .iter()
        .map(|field| format!("{}={}", field.name(), item.value(*field)))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListEvent<F> {
    Inserted { first: usize, last: usize },
    Removed { first: usize, last: usize },
    Updated { index: usize, field: F },
}

pub struct KeyedList<T: Entity> {
    items: Vec<T>,
    observers: Vec<UnboundedSender<ListEvent<T::Field>>>,
}

impl<T: Entity> Default for KeyedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> KeyedList<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            observers: Vec::new(),
        }
    }

    /// Events arrive in mutation order. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> UnboundedReceiver<ListEvent<T::Field>> {
        let (sender, receiver) = unbounded();
        self.observers.push(sender);
        receiver
    }

    fn emit(&mut self, event: ListEvent<T::Field>) {
        self.observers
            .retain(|observer| observer.unbounded_send(event).is_ok());
    }

    pub fn position(&self, key: &T::Key) -> Option<usize> {
        self.items.iter().position(|item| item.has_key(key))
    }

    pub fn find(&self, key: &T::Key) -> Option<&T> {
        self.items.iter().find(|item| item.has_key(key))
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.position(key).is_some()
    }

    /// Returns `false` without touching the list when the key is already present.
    pub fn insert(&mut self, item: T) -> bool {
        if self.contains(&item.key()) {
            return false;
        }
        let index = self.items.len();
        self.items.push(item);
        self.emit(ListEvent::Inserted {
            first: index,
            last: index,
        });
        true
    }

    pub fn remove_by_key(&mut self, key: &T::Key) -> Option<T> {
        let index = self.position(key)?;
        let removed = self.items.remove(index);
        self.emit(ListEvent::Removed {
            first: index,
            last: index,
        });
        Some(removed)
    }

    pub fn update_field(&mut self, key: &T::Key, update: T::Update) -> bool {
        let Some(index) = self.position(key) else {
            return false;
        };
        let field = self.items[index].apply(update);
        self.emit(ListEvent::Updated { index, field });
        true
    }

    pub fn clear(&mut self) {
        if self.items.is_empty() {
            return;
        }
        let last = self.items.len() - 1;
        self.items.clear();
        self.emit(ListEvent::Removed { first: 0, last });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn keys(&self) -> Vec<T::Key> {
        self.items.iter().map(Entity::key).collect()
    }

    pub fn sorted(&self) -> Vec<&T>
    where
        T: Ord,
    {
        let mut sorted: Vec<&T> = self.items.iter().collect();
        sorted.sort();
        sorted
    }
}

impl<'a, T: Entity> IntoIterator for &'a KeyedList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
