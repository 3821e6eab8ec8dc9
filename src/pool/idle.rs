//! Idle list: a doubly linked list over an index arena.
//!
//! The head holds the most recently returned connection (reused first), the
//! tail the oldest (evicted first). All operations are O(1); freed slots are
//! recycled through a free list so the arena does not grow past its peak.

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// LIFO stack with O(1) access to both ends.
#[derive(Debug)]
pub struct IdleList<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> Default for IdleList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IdleList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Push onto the head (most recent end).
    pub fn push_head(&mut self, value: T) {
        let idx = self.alloc(value);
        self.slots[idx].next = self.head;
        match self.head {
            Some(old) => self.slots[old].prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        self.len += 1;
    }

    /// Push onto the tail (oldest end).
    pub fn push_tail(&mut self, value: T) {
        let idx = self.alloc(value);
        self.slots[idx].prev = self.tail;
        match self.tail {
            Some(old) => self.slots[old].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    /// Pop the most recent entry.
    pub fn pop_head(&mut self) -> Option<T> {
        let idx = self.head?;
        self.head = self.slots[idx].next;
        match self.head {
            Some(new) => self.slots[new].prev = None,
            None => self.tail = None,
        }
        Some(self.release(idx))
    }

    /// Pop the oldest entry.
    pub fn pop_tail(&mut self) -> Option<T> {
        let idx = self.tail?;
        self.tail = self.slots[idx].prev;
        match self.tail {
            Some(new) => self.slots[new].next = None,
            None => self.head = None,
        }
        Some(self.release(idx))
    }

    /// Remove every entry, head first.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(value) = self.pop_head() {
            out.push(value);
        }
        out
    }

    fn alloc(&mut self, value: T) -> usize {
        let slot = Slot {
            value: Some(value),
            prev: None,
            next: None,
        };
        if let Some(idx) = self.free_list.pop() {
            self.slots[idx] = slot;
            idx
        } else {
            self.slots.push(slot);
            self.slots.len() - 1
        }
    }

    fn release(&mut self, idx: usize) -> T {
        let slot = &mut self.slots[idx];
        slot.prev = None;
        slot.next = None;
        self.free_list.push(idx);
        self.len -= 1;
        // Linked slots always hold a value.
        match slot.value.take() {
            Some(value) => value,
            None => unreachable!("idle list slot {idx} linked without a value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifo_order() {
        let mut list = IdleList::new();
        list.push_head(1);
        list.push_head(2);
        list.push_head(3);
        assert_eq!(list.len(), 3);
        assert_eq!(list.pop_head(), Some(3));
        assert_eq!(list.pop_head(), Some(2));
        assert_eq!(list.pop_head(), Some(1));
        assert_eq!(list.pop_head(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_evict_oldest_from_tail() {
        let mut list = IdleList::new();
        for i in 0..4 {
            list.push_head(i);
        }
        assert_eq!(list.pop_tail(), Some(0));
        assert_eq!(list.pop_head(), Some(3));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_push_tail_rotates() {
        let mut list = IdleList::new();
        list.push_head("a");
        list.push_head("b");

        // The health loop pops from the head and re-queues at the tail.
        let first = list.pop_head().unwrap();
        list.push_tail(first);
        assert_eq!(list.drain(), vec!["a", "b"]);
    }

    #[test]
    fn test_slots_are_recycled() {
        let mut list = IdleList::new();
        for round in 0..10 {
            list.push_head(round);
            list.push_head(round + 100);
            list.pop_tail();
            list.pop_tail();
        }
        assert!(list.is_empty());
        assert_eq!(list.slots.len(), 2);
        assert_eq!(list.pop_tail(), None);
    }

    #[test]
    fn test_single_entry_both_ends() {
        let mut list = IdleList::new();
        list.push_tail(7);
        assert_eq!(list.pop_head(), Some(7));
        list.push_head(8);
        assert_eq!(list.pop_tail(), Some(8));
        assert!(list.head.is_none() && list.tail.is_none());
    }
}
