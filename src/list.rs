//! Intrusive doubly-linked list of heap-allocated nodes (C3).
//!
//! Each node is one allocation from the C4 heap facade, laid out as
//! `[prev_ptr | next_ptr | user bytes]`; `ListNode` is a handle to the user
//! bytes, mirroring `BlockHeader::payload_ptr` in spirit.

use core::mem::size_of;
use core::ptr::NonNull;

use crate::heap;

#[repr(C)]
struct Link {
    prev: Option<NonNull<Link>>,
    next: Option<NonNull<Link>>,
}

const LINK_OVERHEAD: usize = size_of::<Link>();

/// Handle to a node's user payload, as returned by `ins_head`/`ins_tail`/`ins_prev`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ListNode(NonNull<u8>);

impl ListNode {
    pub fn as_ptr(&self) -> *mut u8 {
        self.0.as_ptr()
    }

    fn link(self) -> NonNull<Link> {
        unsafe { NonNull::new_unchecked(self.0.as_ptr().sub(LINK_OVERHEAD) as *mut Link) }
    }

    fn from_link(link: NonNull<Link>) -> Self {
        unsafe {
            ListNode(NonNull::new_unchecked(
                (link.as_ptr() as *mut u8).add(LINK_OVERHEAD),
            ))
        }
    }
}

/// `{ node_size, head, tail }` descriptor.
pub struct List {
    node_size: usize,
    head: Option<NonNull<Link>>,
    tail: Option<NonNull<Link>>,
    len: usize,
}

impl List {
    pub const fn new(node_size: usize) -> Self {
        List {
            node_size,
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Re-initializes an existing descriptor. Does not free any nodes still
    /// linked in it; call `clear` first if that matters.
    pub fn init(&mut self, node_size: usize) {
        self.node_size = node_size;
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    fn alloc_node(&self) -> Option<NonNull<Link>> {
        let raw = heap::alloc(LINK_OVERHEAD + self.node_size)?;
        let link_ptr = raw.as_ptr() as *mut Link;
        unsafe {
            link_ptr.write(Link {
                prev: None,
                next: None,
            });
            Some(NonNull::new_unchecked(link_ptr))
        }
    }

    fn link_as_head(&mut self, link: NonNull<Link>) {
        unsafe {
            (*link.as_ptr()).prev = None;
            (*link.as_ptr()).next = self.head;
        }
        if let Some(h) = self.head {
            unsafe {
                (*h.as_ptr()).prev = Some(link);
            }
        }
        self.head = Some(link);
        if self.tail.is_none() {
            self.tail = Some(link);
        }
    }

    fn link_as_tail(&mut self, link: NonNull<Link>) {
        unsafe {
            (*link.as_ptr()).next = None;
            (*link.as_ptr()).prev = self.tail;
        }
        if let Some(t) = self.tail {
            unsafe {
                (*t.as_ptr()).next = Some(link);
            }
        }
        self.tail = Some(link);
        if self.head.is_none() {
            self.head = Some(link);
        }
    }

    /// Splices `link` in immediately before `anchor`, without touching `len`.
    fn link_before(&mut self, link: NonNull<Link>, anchor: NonNull<Link>) {
        let prev = unsafe { anchor.as_ref().prev };
        unsafe {
            (*link.as_ptr()).prev = prev;
            (*link.as_ptr()).next = Some(anchor);
            (*anchor.as_ptr()).prev = Some(link);
        }
        match prev {
            Some(p) => unsafe {
                (*p.as_ptr()).next = Some(link);
            },
            None => self.head = Some(link),
        }
    }

    fn unlink(&mut self, link: NonNull<Link>) {
        let (prev, next) = unsafe { (link.as_ref().prev, link.as_ref().next) };
        match prev {
            Some(p) => unsafe {
                (*p.as_ptr()).next = next;
            },
            None => self.head = next,
        }
        match next {
            Some(n) => unsafe {
                (*n.as_ptr()).prev = prev;
            },
            None => self.tail = prev,
        }
    }

    pub fn ins_head(&mut self) -> Option<ListNode> {
        let link = self.alloc_node()?;
        self.link_as_head(link);
        self.len += 1;
        Some(ListNode::from_link(link))
    }

    pub fn ins_tail(&mut self) -> Option<ListNode> {
        let link = self.alloc_node()?;
        self.link_as_tail(link);
        self.len += 1;
        Some(ListNode::from_link(link))
    }

    pub fn ins_prev(&mut self, anchor: ListNode) -> Option<ListNode> {
        let link = self.alloc_node()?;
        self.link_before(link, anchor.link());
        self.len += 1;
        Some(ListNode::from_link(link))
    }

    pub fn remove(&mut self, node: ListNode) {
        let link = node.link();
        self.unlink(link);
        self.len -= 1;
        let raw = unsafe { NonNull::new_unchecked(link.as_ptr() as *mut u8) };
        heap::free(Some(raw));
    }

    /// Frees every node currently on the list via C4.
    pub fn clear(&mut self) {
        let mut cur = self.head;
        while let Some(link) = cur {
            cur = unsafe { link.as_ref().next };
            let raw = unsafe { NonNull::new_unchecked(link.as_ptr() as *mut u8) };
            heap::free(Some(raw));
        }
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Moves `node` from this list onto `dest`, as `dest`'s new head or tail.
    pub fn chg_list(&mut self, dest: &mut List, node: ListNode, as_head: bool) {
        let link = node.link();
        self.unlink(link);
        self.len -= 1;
        if as_head {
            dest.link_as_head(link);
        } else {
            dest.link_as_tail(link);
        }
        dest.len += 1;
    }

    /// Relocates `node` to sit immediately before `anchor`, both already on
    /// this list.
    pub fn move_before(&mut self, node: ListNode, anchor: ListNode) {
        let link = node.link();
        self.unlink(link);
        self.link_before(link, anchor.link());
    }

    pub fn get_head(&self) -> Option<ListNode> {
        self.head.map(ListNode::from_link)
    }

    pub fn get_tail(&self) -> Option<ListNode> {
        self.tail.map(ListNode::from_link)
    }

    pub fn get_next(&self, node: ListNode) -> Option<ListNode> {
        unsafe { node.link().as_ref().next }.map(ListNode::from_link)
    }

    pub fn get_prev(&self, node: ListNode) -> Option<ListNode> {
        unsafe { node.link().as_ref().prev }.map(ListNode::from_link)
    }

    pub fn get_len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> std::sync::MutexGuard<'static, ()> {
        let guard = crate::test_sync::GLOBAL.lock().unwrap();
        heap::init();
        guard
    }

    #[test]
    fn insert_and_walk_head_to_tail() {
        let _g = setup();
        let mut list = List::new(size_of::<u32>());
        let a = list.ins_tail().unwrap();
        let b = list.ins_tail().unwrap();
        unsafe {
            *(a.as_ptr() as *mut u32) = 1;
            *(b.as_ptr() as *mut u32) = 2;
        }
        assert_eq!(list.get_len(), 2);
        let head = list.get_head().unwrap();
        assert_eq!(head, a);
        let next = list.get_next(head).unwrap();
        assert_eq!(next, b);
        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    fn remove_relinks_neighbors() {
        let _g = setup();
        let mut list = List::new(4);
        let a = list.ins_tail().unwrap();
        let b = list.ins_tail().unwrap();
        let c = list.ins_tail().unwrap();
        list.remove(b);
        assert_eq!(list.get_len(), 2);
        assert_eq!(list.get_next(a).unwrap(), c);
        assert_eq!(list.get_prev(c).unwrap(), a);
        list.clear();
    }

    #[test]
    fn ins_head_places_newest_first() {
        let _g = setup();
        let mut list = List::new(4);
        let a = list.ins_head().unwrap();
        let b = list.ins_head().unwrap();
        assert_eq!(list.get_head().unwrap(), b);
        assert_eq!(list.get_tail().unwrap(), a);
        list.clear();
    }
}
