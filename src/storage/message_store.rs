//! Partitioned in-memory message store.
//!
//! Every message lives in exactly one origin partition (Inbox or Sent) or in
//! Trash. Favorite is a derived membership: favoriting adds a reference to the
//! Favorite sequence while the message stays where it is.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::{Message, MessageId, Partition};

#[derive(Debug)]
struct Entry {
    message: Message,
    origin: Partition,
    membership: HashSet<Partition>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<MessageId, Entry>,
    sequences: HashMap<Partition, VecDeque<MessageId>>,
    remote_ids: HashSet<String>,
}

impl Inner {
    fn sequence(&mut self, partition: Partition) -> &mut VecDeque<MessageId> {
        self.sequences.entry(partition).or_default()
    }

    // Membership lookups go through the entry index; removing from the
    // ordered sequence is linear in the partition length.
    fn unlink(&mut self, partition: Partition, id: &MessageId) {
        self.sequence(partition).retain(|other| other != id);
        if let Some(entry) = self.entries.get_mut(id) {
            entry.membership.remove(&partition);
        }
    }

    fn link_front(&mut self, partition: Partition, id: &MessageId) {
        self.sequence(partition).push_front(id.clone());
        if let Some(entry) = self.entries.get_mut(id) {
            entry.membership.insert(partition);
        }
    }

    fn insert(&mut self, mut message: Message, origin: Partition) -> Option<MessageId> {
        if let Some(remote_id) = &message.remote_id {
            if self.remote_ids.contains(remote_id) {
                return None;
            }
        }
        let id = message.id.clone().unwrap_or_else(MessageId::generate);
        if self.entries.contains_key(&id) {
            return None;
        }
        if let Some(remote_id) = &message.remote_id {
            self.remote_ids.insert(remote_id.clone());
        }

        message.id = Some(id.clone());
        let favorite = message.is_favorite;
        self.entries.insert(
            id.clone(),
            Entry {
                message,
                origin,
                membership: HashSet::new(),
            },
        );
        self.link_front(origin, &id);
        if favorite {
            self.link_front(Partition::Favorite, &id);
        }
        Some(id)
    }

    fn member(&mut self, partition: Partition, id: &MessageId) -> Option<&mut Entry> {
        self.entries
            .get_mut(id)
            .filter(|entry| entry.membership.contains(&partition))
    }
}

/// Thread-safe store of the four message partitions.
///
/// All operations take one lock for their whole duration, so readers never
/// observe a message half-way through a move.
#[derive(Debug, Default)]
pub struct MessageStore {
    inner: Mutex<Inner>,
}

impl MessageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a retrieved message to the top of Inbox.
    ///
    /// Returns `None` without inserting when a message with the same
    /// `remote_id` (or id) is already known.
    pub fn insert_received(&self, message: Message) -> Option<MessageId> {
        self.lock().insert(message, Partition::Inbox)
    }

    /// Adds a sent message to the top of Sent.
    pub fn insert_sent(&self, mut message: Message) -> MessageId {
        let mut inner = self.lock();
        // Sent echoes are never deduplicated.
        message.remote_id = None;
        if message
            .id
            .as_ref()
            .is_some_and(|id| inner.entries.contains_key(id))
        {
            message.id = None;
        }
        inner
            .insert(message, Partition::Sent)
            .unwrap_or_else(MessageId::generate)
    }

    /// Marks a message in `partition` as read. Returns whether it was found.
    pub fn mark_read(&self, partition: Partition, id: &MessageId) -> bool {
        match self.lock().member(partition, id) {
            Some(entry) => {
                entry.message.is_read = true;
                true
            }
            None => false,
        }
    }

    /// Flips the favorite flag of a message shown in `partition`.
    ///
    /// Favoriting adds a Favorite reference; un-favoriting (from Favorite or
    /// from the origin partition) removes it, a scan of the Favorite
    /// sequence. Trash entries cannot be favorited. Returns the new flag, or
    /// `None` if nothing changed.
    pub fn toggle_favorite(&self, partition: Partition, id: &MessageId) -> Option<bool> {
        if partition == Partition::Trash {
            return None;
        }
        let mut inner = self.lock();
        let entry = inner.member(partition, id)?;
        let favorite = !entry.message.is_favorite;
        entry.message.is_favorite = favorite;

        if favorite {
            inner.link_front(Partition::Favorite, id);
        } else {
            inner.unlink(Partition::Favorite, id);
        }
        Some(favorite)
    }

    /// Moves a message shown in `partition` to Trash.
    ///
    /// Trashing from Favorite trashes the underlying message. The favorite
    /// flag is cleared. Returns whether the message moved.
    pub fn move_to_trash(&self, partition: Partition, id: &MessageId) -> bool {
        if partition == Partition::Trash {
            return false;
        }
        let mut inner = self.lock();
        let Some(entry) = inner.member(partition, id) else {
            return false;
        };
        let origin = entry.origin;
        entry.message.is_favorite = false;

        inner.unlink(origin, id);
        inner.unlink(Partition::Favorite, id);
        inner.link_front(Partition::Trash, id);
        true
    }

    /// Moves a trashed message back to the top of its origin partition.
    pub fn restore(&self, id: &MessageId) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.member(Partition::Trash, id) else {
            return false;
        };
        let origin = entry.origin;

        inner.unlink(Partition::Trash, id);
        inner.link_front(origin, id);
        true
    }

    /// Returns a copy of a message shown in `partition`.
    pub fn find(&self, partition: Partition, id: &MessageId) -> Option<Message> {
        self.lock()
            .member(partition, id)
            .map(|entry| entry.message.clone())
    }

    /// Returns a copy of a message.
    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.lock().entries.get(id).map(|entry| entry.message.clone())
    }

    /// Returns a snapshot of `partition`, newest first.
    pub fn view(&self, partition: Partition) -> Vec<Message> {
        let inner = self.lock();
        inner
            .sequences
            .get(&partition)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.entries.get(id))
                    .map(|entry| entry.message.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of unread messages in `partition`.
    pub fn unread_count(&self, partition: Partition) -> usize {
        let inner = self.lock();
        inner.sequences.get(&partition).map_or(0, |ids| {
            ids.iter()
                .filter_map(|id| inner.entries.get(id))
                .filter(|entry| !entry.message.is_read)
                .count()
        })
    }

    /// Number of messages in `partition`.
    pub fn len(&self, partition: Partition) -> usize {
        self.lock().sequences.get(&partition).map_or(0, VecDeque::len)
    }

    /// Returns true if the store holds no messages at all.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}
