//! Userland Heap — Slab Allocator над статической ареной
//! Userland heap — slab allocator over a static arena
//!
//! Мелкие объекты — из slab-кэшей, крупные — целыми страницами.
//! Small objects come from slab caches, large ones as whole pages.
//! Исчерпание арены возвращает null, чтобы `try_reserve` мог вернуть ошибку.
//! Arena exhaustion returns null so `try_reserve` can report it.
//!
//! Использование / Usage:
//!   #[global_allocator]
//!   static HEAP: SlabHeap<{ 512 * 1024 }> = SlabHeap::new();

use core::{
    alloc::{GlobalAlloc, Layout},
    cell::UnsafeCell,
    ptr::{self, NonNull},
};
use spin::Mutex;

pub const PAGE_SIZE: usize = 4096;

const SLAB_SIZES: [usize; 9] = [8, 16, 32, 64, 128, 256, 512, 1024, 2048];
const NUM_SLABS: usize = SLAB_SIZES.len();

struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

// NonNull не Send по умолчанию — оборачиваем
// NonNull is not Send by default — wrap it
struct FreeList(Option<NonNull<FreeNode>>);
unsafe impl Send for FreeList {}

struct SlabCache {
    obj_size: usize,
    free: FreeList,
}

impl SlabCache {
    const fn new(obj_size: usize) -> Self {
        Self { obj_size, free: FreeList(None) }
    }

    fn grow(&mut self, page: *mut u8) {
        let start = page as usize;
        let count = PAGE_SIZE / self.obj_size;

        for i in (0..count).rev() {
            let ptr = (start + i * self.obj_size) as *mut FreeNode;
            unsafe {
                (*ptr).next = self.free.0;
                self.free.0 = NonNull::new(ptr);
            }
        }
    }

    fn pop(&mut self) -> Option<*mut u8> {
        let node = self.free.0?;
        unsafe { self.free.0 = (*node.as_ptr()).next; }
        Some(node.as_ptr() as *mut u8)
    }

    fn push(&mut self, ptr: *mut u8) {
        let node = ptr as *mut FreeNode;
        unsafe {
            (*node).next = self.free.0;
            self.free.0 = NonNull::new(node);
        }
    }
}

/// Освобождённый крупный блок / Freed large block
struct LargeNode {
    next: Option<NonNull<LargeNode>>,
    pages: usize,
}

struct LargeList(Option<NonNull<LargeNode>>);
unsafe impl Send for LargeList {}

#[repr(C, align(4096))]
struct Arena<const N: usize>([u8; N]);

pub struct SlabHeap<const N: usize> {
    arena: UnsafeCell<Arena<N>>,
    /// Смещение первой невыданной страницы / Offset of the first unused page
    brk: Mutex<usize>,
    large: Mutex<LargeList>,
    slabs: [Mutex<SlabCache>; NUM_SLABS],
}

// Арена доступна только через замки выше / Arena is only reached under the locks above
unsafe impl<const N: usize> Sync for SlabHeap<N> {}

impl<const N: usize> SlabHeap<N> {
    pub const fn new() -> Self {
        Self {
            arena: UnsafeCell::new(Arena([0; N])),
            brk: Mutex::new(0),
            large: Mutex::new(LargeList(None)),
            slabs: [
                Mutex::new(SlabCache::new(SLAB_SIZES[0])),
                Mutex::new(SlabCache::new(SLAB_SIZES[1])),
                Mutex::new(SlabCache::new(SLAB_SIZES[2])),
                Mutex::new(SlabCache::new(SLAB_SIZES[3])),
                Mutex::new(SlabCache::new(SLAB_SIZES[4])),
                Mutex::new(SlabCache::new(SLAB_SIZES[5])),
                Mutex::new(SlabCache::new(SLAB_SIZES[6])),
                Mutex::new(SlabCache::new(SLAB_SIZES[7])),
                Mutex::new(SlabCache::new(SLAB_SIZES[8])),
            ],
        }
    }

    /// Байт арены ещё не выдано / Arena bytes never handed out
    pub fn untouched(&self) -> usize {
        N - *self.brk.lock()
    }

    fn slab_index(size: usize) -> Option<usize> {
        SLAB_SIZES.iter().position(|&s| s >= size)
    }

    fn pages_for(size: usize) -> usize {
        size.div_ceil(PAGE_SIZE)
    }

    fn take_pages(&self, pages: usize) -> Option<*mut u8> {
        let mut brk = self.brk.lock();
        let len = pages.checked_mul(PAGE_SIZE)?;
        let end = brk.checked_add(len).filter(|&end| end <= N)?;
        let base = self.arena.get() as *mut u8;
        let ptr = unsafe { base.add(*brk) };
        *brk = end;
        Some(ptr)
    }

    fn alloc_large(&self, pages: usize) -> *mut u8 {
        // first fit среди освобождённых / first fit among freed blocks
        {
            let mut large = self.large.lock();
            let mut link: *mut Option<NonNull<LargeNode>> = &mut large.0;
            unsafe {
                while let Some(node) = *link {
                    let have = (*node.as_ptr()).pages;
                    if have >= pages {
                        *link = (*node.as_ptr()).next;
                        // хвост остаётся в списке / the tail stays on the list
                        if have > pages {
                            let rest = (node.as_ptr() as *mut u8).add(pages * PAGE_SIZE) as *mut LargeNode;
                            (*rest).pages = have - pages;
                            (*rest).next = *link;
                            *link = NonNull::new(rest);
                        }
                        return node.as_ptr() as *mut u8;
                    }
                    link = &mut (*node.as_ptr()).next;
                }
            }
        }
        self.take_pages(pages).unwrap_or(ptr::null_mut())
    }

    fn free_large(&self, ptr: *mut u8, pages: usize) {
        let node = ptr as *mut LargeNode;
        let mut large = self.large.lock();
        unsafe {
            (*node).pages = pages;
            (*node).next = large.0;
            large.0 = NonNull::new(node);
        }
    }
}

impl<const N: usize> Default for SlabHeap<N> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const N: usize> GlobalAlloc for SlabHeap<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > PAGE_SIZE {
            return ptr::null_mut();
        }
        let size = layout.size().max(layout.align());
        match Self::slab_index(size) {
            Some(idx) => {
                let mut slab = self.slabs[idx].lock();
                if let Some(ptr) = slab.pop() {
                    return ptr;
                }
                match self.take_pages(1) {
                    Some(page) => {
                        slab.grow(page);
                        slab.pop().unwrap_or(ptr::null_mut())
                    }
                    None => ptr::null_mut(),
                }
            }
            None => self.alloc_large(Self::pages_for(size)),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let size = layout.size().max(layout.align());
        match Self::slab_index(size) {
            Some(idx) => self.slabs[idx].lock().push(ptr),
            None => self.free_large(ptr, Self::pages_for(size)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Box<SlabHeap<{ 4 * PAGE_SIZE }>> {
        Box::new(SlabHeap::new())
    }

    #[test]
    fn small_objects_are_recycled() {
        let heap = heap();
        let layout = Layout::from_size_align(24, 8).unwrap();
        unsafe {
            let a = heap.alloc(layout);
            assert!(!a.is_null());
            assert_eq!(a as usize % 32, 0);
            heap.dealloc(a, layout);
            assert_eq!(heap.alloc(layout), a);
        }
        assert_eq!(heap.untouched(), 3 * PAGE_SIZE);
    }

    #[test]
    fn exhaustion_returns_null() {
        let heap = heap();
        let page = Layout::from_size_align(3 * PAGE_SIZE, 8).unwrap();
        let more = Layout::from_size_align(2 * PAGE_SIZE, 8).unwrap();
        unsafe {
            let big = heap.alloc(page);
            assert!(!big.is_null());
            assert!(heap.alloc(more).is_null());

            heap.dealloc(big, page);
            assert_eq!(heap.alloc(more), big);
        }
    }

    #[test]
    fn large_block_is_split_on_reuse() {
        let heap = heap();
        let three = Layout::from_size_align(3 * PAGE_SIZE, 8).unwrap();
        let one = Layout::from_size_align(PAGE_SIZE, 8).unwrap();
        unsafe {
            let big = heap.alloc(three);
            heap.dealloc(big, three);

            let a = heap.alloc(one);
            let b = heap.alloc(one);
            let c = heap.alloc(one);
            assert_eq!(a, big);
            assert_eq!(b, big.add(PAGE_SIZE));
            assert_eq!(c, big.add(2 * PAGE_SIZE));
            assert_eq!(heap.untouched(), PAGE_SIZE);
        }
    }
}
