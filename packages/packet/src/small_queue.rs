// queue that keeps its first few elements inline.

use std::{
    collections::VecDeque,
    ops::{Index, IndexMut},
    fmt::{self, Formatter, Debug},
};


// queue that keeps its first `N` elements inline and spills the rest onto the heap.
#[derive(Clone)]
pub(crate) struct SmallQueue<T, const N: usize> {
    // front elements, as a ring starting at `start`.
    //
    // invariant: slot at ring index i is some iff i < ring_len.
    ring: [Option<T>; N],
    start: usize,
    ring_len: usize,
    // back elements.
    //
    // invariant: non-empty only if the ring is full.
    spill: VecDeque<T>,
}

impl<T, const N: usize> SmallQueue<T, N> {
    // construct empty.
    pub(crate) fn new() -> Self {
        SmallQueue {
            ring: [const { None }; N],
            start: 0,
            ring_len: 0,
            spill: VecDeque::new(),
        }
    }

    // current length in elements.
    pub(crate) fn len(&self) -> usize {
        self.ring_len + self.spill.len()
    }

    // convert logical index within the ring to a slot index.
    fn slot(&self, idx: usize) -> usize {
        (self.start + idx) % N
    }

    // push to back of queue.
    pub(crate) fn push_back(&mut self, elem: T) {
        if self.ring_len < N {
            debug_assert!(self.spill.is_empty(), "SmallQueue spilled before full (internal bug)");
            let slot = self.slot(self.ring_len);
            self.ring[slot] = Some(elem);
            self.ring_len += 1;
        } else {
            self.spill.push_back(elem);
        }
    }

    // pop from front of queue.
    pub(crate) fn pop_front(&mut self) -> Option<T> {
        if self.ring_len == 0 {
            return None;
        }
        let elem = self.ring[self.start].take();
        self.start = (self.start + 1) % N;
        self.ring_len -= 1;

        // pull the next spilled element into the freed slot
        if let Some(next) = self.spill.pop_front() {
            let slot = self.slot(self.ring_len);
            self.ring[slot] = Some(next);
            self.ring_len += 1;
        }
        elem
    }

    // iterate from front to back by reference.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.len()).map(move |i| &self[i])
    }
}

impl<T, const N: usize> Index<usize> for SmallQueue<T, N> {
    type Output = T;

    fn index(&self, idx: usize) -> &T {
        assert!(idx < self.len(), "SmallQueue index out of bounds");
        if idx < self.ring_len {
            match &self.ring[self.slot(idx)] {
                Some(elem) => elem,
                None => unreachable!("SmallQueue slot empty (internal bug)"),
            }
        } else {
            &self.spill[idx - self.ring_len]
        }
    }
}

impl<T, const N: usize> IndexMut<usize> for SmallQueue<T, N> {
    fn index_mut(&mut self, idx: usize) -> &mut T {
        assert!(idx < self.len(), "SmallQueue index out of bounds");
        if idx < self.ring_len {
            let slot = self.slot(idx);
            match &mut self.ring[slot] {
                Some(elem) => elem,
                None => unreachable!("SmallQueue slot empty (internal bug)"),
            }
        } else {
            let idx = idx - self.ring_len;
            &mut self.spill[idx]
        }
    }
}

impl<T, const N: usize> Default for SmallQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Debug, const N: usize> Debug for SmallQueue<T, N> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T, const N: usize> Iterator for SmallQueue<T, N> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.pop_front()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn matches_vec_deque() {
        let mut queue_1 = VecDeque::new();
        let mut queue_2 = SmallQueue::<u32, 2>::new();
        for i in 0u32..500 {
            // push two, pop one, with periodic full drains
            queue_1.push_back(i);
            queue_2.push_back(i);
            if i % 3 != 0 {
                assert_eq!(queue_2.pop_front(), queue_1.pop_front());
            }
            if i % 97 == 0 {
                while let Some(elem) = queue_1.pop_front() {
                    assert_eq!(queue_2.pop_front(), Some(elem));
                }
                assert_eq!(queue_2.pop_front(), None);
            }
            assert_eq!(queue_2.len(), queue_1.len());
            for (j, elem) in queue_1.iter().enumerate() {
                assert_eq!(queue_2[j], *elem);
            }
        }
    }
}
