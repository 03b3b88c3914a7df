//! Root and child contexts.
//!
//! The root context pairs the store handle with the service's capability
//! bitset. Children are records in an arena indexed by the caller-facing
//! offset; a child holds only its reduced bitset, so there is no
//! root-child reference cycle. Offsets are reused after close.

use super::store::BlockStore;
use agentd_wire::bitcap::BitCap;
use agentd_wire::dataservice::caps::ApiCap;

/// Size of the child-context arena.
pub const MAX_CHILD_CONTEXTS: usize = 1024;

/// The root context: the store handle plus the root capability set.
pub struct RootContext {
    /// Capabilities currently held by the root handle.
    pub caps: BitCap,
    /// The open store.
    pub store: Box<dyn BlockStore>,
}

impl RootContext {
    /// Opens a root context holding every capability.
    pub fn new(store: Box<dyn BlockStore>) -> RootContext {
        RootContext {
            caps: BitCap::all(),
            store,
        }
    }

    /// Monotonically reduces the root capability set: `caps ← caps ∧ mask`.
    pub fn reduce_caps(&mut self, mask: &BitCap) {
        self.caps = self.caps.intersect(mask);
    }
}

/// Derives a child capability set from a root set and a mask.
///
/// The intersection is taken, then the child-create bit is forcibly
/// cleared so children cannot mint further children.
pub fn derive_child_caps(root_caps: &BitCap, mask: &BitCap) -> BitCap {
    let mut caps = root_caps.intersect(mask);
    caps.clear(ApiCap::ChildContextCreate);
    caps
}

/// The child-context arena.
#[derive(Debug, Default)]
pub struct ChildArena {
    slots: Vec<Option<BitCap>>,
}

impl ChildArena {
    /// An empty arena.
    pub fn new() -> ChildArena {
        ChildArena::default()
    }

    /// Allocates the lowest free offset for a child with `caps`.
    ///
    /// Returns `None` when the arena is full.
    pub fn allocate(&mut self, caps: BitCap) -> Option<u32> {
        if let Some(free) = self.slots.iter().position(Option::is_none) {
            self.slots[free] = Some(caps);
            return Some(free as u32);
        }
        if self.slots.len() >= MAX_CHILD_CONTEXTS {
            return None;
        }
        self.slots.push(Some(caps));
        Some(self.slots.len() as u32 - 1)
    }

    /// The capability set of an open child.
    pub fn get(&self, offset: u32) -> Option<&BitCap> {
        self.slots.get(offset as usize)?.as_ref()
    }

    /// Closes a child, zeroing its slot. Returns false when the offset
    /// names no open child.
    pub fn close(&mut self, offset: u32) -> bool {
        match self.slots.get_mut(offset as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Number of open children.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataservice::store::MemoryStore;

    #[test]
    fn root_starts_with_all_caps() {
        let root = RootContext::new(Box::new(MemoryStore::open("data")));
        assert!(root.caps.is_set(ApiCap::AppBlockWrite));
        assert!(root.caps.is_set(ApiCap::ChildContextCreate));
    }

    #[test]
    fn reduction_is_monotone() {
        let mut root = RootContext::new(Box::new(MemoryStore::open("data")));
        let mut mask = BitCap::all();
        mask.clear(ApiCap::AppBlockWrite);

        root.reduce_caps(&mask);
        assert!(!root.caps.is_set(ApiCap::AppBlockWrite));

        // Reducing with all-ones cannot restore the bit.
        root.reduce_caps(&BitCap::all());
        assert!(!root.caps.is_set(ApiCap::AppBlockWrite));
    }

    #[test]
    fn derived_children_lose_the_create_bit() {
        let caps = derive_child_caps(&BitCap::all(), &BitCap::all());
        assert!(!caps.is_set(ApiCap::ChildContextCreate));
        assert!(caps.is_set(ApiCap::AppBlockRead));
    }

    #[test]
    fn derived_caps_are_subset_of_root() {
        let mut root_caps = BitCap::all();
        root_caps.clear(ApiCap::AppBlockWrite);
        let caps = derive_child_caps(&root_caps, &BitCap::all());
        assert!(caps.is_subset_of(&root_caps));
        assert!(!caps.is_set(ApiCap::AppBlockWrite));
    }

    #[test]
    fn arena_allocates_lowest_free_offset() {
        let mut arena = ChildArena::new();
        assert_eq!(arena.allocate(BitCap::none()), Some(0));
        assert_eq!(arena.allocate(BitCap::none()), Some(1));
        assert_eq!(arena.allocate(BitCap::none()), Some(2));

        assert!(arena.close(1));
        assert_eq!(arena.allocate(BitCap::none()), Some(1));
        assert_eq!(arena.open_count(), 3);
    }

    #[test]
    fn close_unknown_offset_fails() {
        let mut arena = ChildArena::new();
        assert!(!arena.close(0));
        arena.allocate(BitCap::none()).unwrap();
        assert!(arena.close(0));
        assert!(!arena.close(0));
    }

    #[test]
    fn arena_is_bounded() {
        let mut arena = ChildArena::new();
        for _ in 0..MAX_CHILD_CONTEXTS {
            assert!(arena.allocate(BitCap::none()).is_some());
        }
        assert_eq!(arena.allocate(BitCap::none()), None);
    }
}
