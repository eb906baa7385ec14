//! Memory arena
//!
//! Every process owns exactly one page of a shared, growable arena. A page is
//! an ordered run of slots, and each slot holds an arbitrary JSON value.
//!
//! There is no MMU here, but the same rules still hold:
//! - Offsets are handed out once, in order, and never reused
//! - Reads outside a page are absent values, never errors
//! - Writes grow the page as far as they need to
//! - A process reaches its page only through a `ProcessMemory` capability
//! - Pages of terminated processes are released; the offset stays retired

use log::{debug, warn};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

const TARGET: &str = "aurora::memory";

/// Content of a single memory slot
pub type Slot = Value;

/// Index of a page inside the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageOffset(pub usize);

impl std::fmt::Display for PageOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// A page is either live (holding slots) or released for good
#[derive(Debug, Clone)]
enum Page {
    Live(Vec<Option<Slot>>),
    Released,
}

/// The shared arena of per-process pages
#[derive(Debug, Default)]
pub struct MemoryArena {
    pages: Vec<Page>,
}

impl MemoryArena {
    pub fn new() -> Self {
        Self { pages: Vec::new() }
    }

    /// Allocate a fresh, empty page and return its offset
    pub fn allocate_page(&mut self) -> PageOffset {
        let offset = PageOffset(self.pages.len());
        self.pages.push(Page::Live(Vec::new()));
        debug!(target: TARGET, "allocated {}", offset);
        offset
    }

    /// Read a slot. Anything out of range (or released) is simply absent.
    pub fn read_slot(&self, offset: PageOffset, index: usize) -> Option<Slot> {
        match self.pages.get(offset.0)? {
            Page::Live(slots) => slots.get(index).cloned().flatten(),
            Page::Released => None,
        }
    }

    /// Write a slot, extending the page with empty slots if needed.
    ///
    /// Returns false when the offset was never allocated or has been
    /// released; the value is dropped in that case.
    pub fn write_slot(&mut self, offset: PageOffset, index: usize, value: Slot) -> bool {
        match self.pages.get_mut(offset.0) {
            Some(Page::Live(slots)) => {
                if index >= slots.len() {
                    slots.resize(index + 1, None);
                }
                slots[index] = Some(value);
                true
            }
            Some(Page::Released) => {
                warn!(target: TARGET, "write to released {} dropped", offset);
                false
            }
            None => {
                warn!(target: TARGET, "write to unallocated {} dropped", offset);
                false
            }
        }
    }

    /// Snapshot of a whole page
    pub fn page(&self, offset: PageOffset) -> Option<Vec<Option<Slot>>> {
        match self.pages.get(offset.0)? {
            Page::Live(slots) => Some(slots.clone()),
            Page::Released => None,
        }
    }

    pub fn is_live(&self, offset: PageOffset) -> bool {
        matches!(self.pages.get(offset.0), Some(Page::Live(_)))
    }

    /// Drop a page's contents. The offset is never handed out again.
    pub fn release_page(&mut self, offset: PageOffset) -> bool {
        match self.pages.get_mut(offset.0) {
            Some(page @ Page::Live(_)) => {
                *page = Page::Released;
                debug!(target: TARGET, "released {}", offset);
                true
            }
            _ => false,
        }
    }

    pub fn is_released(&self, offset: PageOffset) -> bool {
        matches!(self.pages.get(offset.0), Some(Page::Released))
    }

    /// Number of pages ever allocated
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of pages still holding data
    pub fn live_page_count(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| matches!(p, Page::Live(_)))
            .count()
    }
}

/// Shared handle to the arena, owned by the kernel
pub type ArenaHandle = Rc<RefCell<MemoryArena>>;

/// A process's capability over its own page.
///
/// Holds the fixed offset, a handle to the arena, and a private shadow copy
/// of the page. A local write first refreshes the shadow from the arena, so
/// values stored through other paths (the `memory` service) are kept, then
/// pushes only the slot it changed.
#[derive(Debug)]
pub struct ProcessMemory {
    offset: PageOffset,
    arena: ArenaHandle,
    shadow: RefCell<Vec<Option<Slot>>>,
}

impl ProcessMemory {
    pub fn new(offset: PageOffset, arena: ArenaHandle) -> Self {
        let shadow = arena.borrow().page(offset).unwrap_or_default();
        Self {
            offset,
            arena,
            shadow: RefCell::new(shadow),
        }
    }

    pub fn offset(&self) -> PageOffset {
        self.offset
    }

    /// Read from the shadow copy
    pub fn read(&self, index: usize) -> Option<Slot> {
        self.shadow.borrow().get(index).cloned().flatten()
    }

    /// Write one slot to the shadow copy and the arena
    pub fn write(&self, index: usize, value: Slot) -> bool {
        self.sync_from_global();
        {
            let mut shadow = self.shadow.borrow_mut();
            if index >= shadow.len() {
                shadow.resize(index + 1, None);
            }
            shadow[index] = Some(value.clone());
        }
        self.arena.borrow_mut().write_slot(self.offset, index, value)
    }

    /// Merge the shadow copy into the arena.
    ///
    /// Only slots the shadow holds are written; arena slots the shadow has
    /// never seen are left alone.
    pub fn sync_to_global(&self) -> bool {
        let mut arena = self.arena.borrow_mut();
        if !arena.is_live(self.offset) {
            warn!(target: TARGET, "sync of {} to arena failed: page not live", self.offset);
            return false;
        }
        for (index, slot) in self.shadow.borrow().iter().enumerate() {
            if let Some(value) = slot {
                arena.write_slot(self.offset, index, value.clone());
            }
        }
        true
    }

    /// Refresh the shadow copy from the arena
    pub fn sync_from_global(&self) {
        let page = self.arena.borrow().page(self.offset).unwrap_or_default();
        *self.shadow.borrow_mut() = page;
    }

    /// Number of slots in the shadow copy
    pub fn len(&self) -> usize {
        self.shadow.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shared_arena() -> ArenaHandle {
        Rc::new(RefCell::new(MemoryArena::new()))
    }

    #[test]
    fn test_offsets_are_monotonic() {
        let mut arena = MemoryArena::new();
        let offsets: Vec<_> = (0..5).map(|_| arena.allocate_page()).collect();
        for pair in offsets.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(arena.page_count(), 5);
    }

    #[test]
    fn test_out_of_range_reads_are_absent() {
        let mut arena = MemoryArena::new();
        let page = arena.allocate_page();
        assert_eq!(arena.read_slot(page, 0), None);
        assert_eq!(arena.read_slot(page, 100), None);
        assert_eq!(arena.read_slot(PageOffset(42), 0), None);
    }

    #[test]
    fn test_write_extends_page() {
        let mut arena = MemoryArena::new();
        let page = arena.allocate_page();
        assert!(arena.write_slot(page, 3, json!("x")));
        assert_eq!(arena.read_slot(page, 3), Some(json!("x")));
        assert_eq!(arena.read_slot(page, 2), None);
        assert_eq!(arena.page(page).unwrap().len(), 4);
    }

    #[test]
    fn test_write_to_unallocated_offset_is_dropped() {
        let mut arena = MemoryArena::new();
        assert!(!arena.write_slot(PageOffset(7), 0, json!(1)));
        assert_eq!(arena.page_count(), 0);
    }

    #[test]
    fn test_release_retires_offset() {
        let mut arena = MemoryArena::new();
        let a = arena.allocate_page();
        arena.write_slot(a, 0, json!(1));
        assert!(arena.release_page(a));
        assert!(arena.is_released(a));
        assert_eq!(arena.read_slot(a, 0), None);
        assert!(!arena.write_slot(a, 0, json!(2)));
        assert!(!arena.release_page(a));

        let b = arena.allocate_page();
        assert_ne!(a, b);
        assert_eq!(arena.live_page_count(), 1);
    }

    #[test]
    fn test_process_memory_isolation() {
        let arena = shared_arena();
        let p0_page = arena.borrow_mut().allocate_page();
        let p0 = ProcessMemory::new(p0_page, arena.clone());
        let p1_page = arena.borrow_mut().allocate_page();
        let p1 = ProcessMemory::new(p1_page, arena.clone());

        assert!(p0.write(0, json!("x")));
        assert_eq!(p0.read(0), Some(json!("x")));
        assert_eq!(p1.read(0), None);
        assert_eq!(arena.borrow().read_slot(p1.offset(), 0), None);
    }

    #[test]
    fn test_local_writes_reach_the_arena() {
        let arena = shared_arena();
        let mem_page = arena.borrow_mut().allocate_page();
        let mem = ProcessMemory::new(mem_page, arena.clone());
        mem.write(2, json!({"n": 1}));
        assert_eq!(arena.borrow().read_slot(mem.offset(), 2), Some(json!({"n": 1})));
    }

    #[test]
    fn test_sync_from_global_picks_up_arena_writes() {
        let arena = shared_arena();
        let mem_page = arena.borrow_mut().allocate_page();
        let mem = ProcessMemory::new(mem_page, arena.clone());
        arena.borrow_mut().write_slot(mem.offset(), 0, json!(5));

        // Shadow is stale until refreshed
        assert_eq!(mem.read(0), None);
        mem.sync_from_global();
        assert_eq!(mem.read(0), Some(json!(5)));
    }

    #[test]
    fn test_local_write_keeps_arena_writes() {
        let arena = shared_arena();
        let mem_page = arena.borrow_mut().allocate_page();
        let mem = ProcessMemory::new(mem_page, arena.clone());
        arena.borrow_mut().write_slot(mem.offset(), 0, json!("from arena"));

        assert!(mem.write(1, json!("local")));
        assert_eq!(arena.borrow().read_slot(mem.offset(), 0), Some(json!("from arena")));
        assert_eq!(arena.borrow().read_slot(mem.offset(), 1), Some(json!("local")));
        assert_eq!(mem.read(0), Some(json!("from arena")));
    }

    #[test]
    fn test_sync_to_global_merges() {
        let arena = shared_arena();
        let mem_page = arena.borrow_mut().allocate_page();
        let mem = ProcessMemory::new(mem_page, arena.clone());
        assert!(mem.write(0, json!(1)));
        arena.borrow_mut().write_slot(mem.offset(), 3, json!(3));

        assert!(mem.sync_to_global());
        let page = arena.borrow().page(mem.offset()).unwrap();
        assert_eq!(page[0], Some(json!(1)));
        assert_eq!(page[3], Some(json!(3)));
    }

    #[test]
    fn test_sync_to_released_page_fails() {
        let arena = shared_arena();
        let mem_page = arena.borrow_mut().allocate_page();
        let mem = ProcessMemory::new(mem_page, arena.clone());
        arena.borrow_mut().release_page(mem.offset());
        assert!(!mem.write(0, json!(1)));
        assert!(!mem.sync_to_global());
    }
}
