//! Binary heap primitives: in-place heapsort and a comparator driven min-heap.

use std::cmp::Ordering;

/// Sorts a slice in place using heapsort.
///
/// A max-heap is built by sifting down every inner node starting from the middle, then the root is
/// repeatedly swapped with the last element of the shrinking heap and sifted down again.
/// The sort is not stable and uses no extra memory.
pub fn heapsort_by<T, F>(data: &mut [T], compare: F)
where
    F: Fn(&T, &T) -> Ordering,
{
    let len = data.len();
    if len < 2 {
        return;
    }

    for idx in (0..=(len - 1) / 2).rev() {
        sift_down(data, idx, len, &compare);
    }

    for end in (1..len).rev() {
        data.swap(0, end);
        sift_down(data, 0, end, &compare);
    }
}

/// Moves `data[start]` down the max-heap `data[..end]` until both children are not greater.
fn sift_down<T, F>(data: &mut [T], start: usize, end: usize, compare: &F)
where
    F: Fn(&T, &T) -> Ordering,
{
    let mut root = start;

    loop {
        let mut child = 2 * root + 1;
        if child >= end {
            return;
        }

        // pick the greater child
        if child + 1 < end && compare(&data[child], &data[child + 1]) == Ordering::Less {
            child += 1;
        }

        if compare(&data[root], &data[child]) != Ordering::Less {
            return;
        }

        data.swap(root, child);
        root = child;
    }
}

/// Total order over `T` used by [`MinHeap`].
/// Implemented for every `Fn(&T, &T) -> Ordering`.
pub trait Compare<T> {
    fn compare(&self, a: &T, b: &T) -> Ordering;
}

impl<T, F> Compare<T> for F
where
    F: Fn(&T, &T) -> Ordering,
{
    #[inline]
    fn compare(&self, a: &T, b: &T) -> Ordering {
        self(a, b)
    }
}

/// Binary min-heap ordered by a comparator.
///
/// Unlike [`std::collections::BinaryHeap`] the items don't have to implement [`Ord`],
/// the order is defined by `compare` which is monomorphized into the heap operations.
pub struct MinHeap<T, F>
where
    F: Compare<T>,
{
    items: Vec<T>,
    compare: F,
}

impl<T, F> MinHeap<T, F>
where
    F: Compare<T>,
{
    /// Creates an empty heap able to hold `capacity` items without reallocation.
    pub fn with_capacity(capacity: usize, compare: F) -> Self {
        MinHeap {
            items: Vec::with_capacity(capacity),
            compare,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
    }

    /// Removes and returns the smallest item.
    pub fn pop(&mut self) -> Option<T> {
        let last = self.items.len().checked_sub(1)?;
        self.items.swap(0, last);
        let item = self.items.pop();
        self.sift_down(0);
        item
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.compare.compare(&self.items[idx], &self.items[parent]) != Ordering::Less {
                break;
            }
            self.items.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.items.len();

        loop {
            let mut child = 2 * idx + 1;
            if child >= len {
                break;
            }
            if child + 1 < len && self.compare.compare(&self.items[child + 1], &self.items[child]) == Ordering::Less {
                child += 1;
            }
            if self.compare.compare(&self.items[child], &self.items[idx]) != Ordering::Less {
                break;
            }
            self.items.swap(idx, child);
            idx = child;
        }
    }
}
