// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use ::std::{
    marker::PhantomData,
    ptr::NonNull,
};

/// An intrusive singly-linked FIFO that owns its elements. Elements carry their own link, so pushing and popping
/// never allocates; a boxed element is leaked into the queue on push and reclaimed on pop.
#[derive(Debug)]
pub struct IntrusiveQueue<T: IntrusivelyQueueable> {
    front: Option<NonNull<T>>,
    back: Option<NonNull<T>>,
    len: usize,
    // The queue owns one Box<T> per linked element.
    phantom: PhantomData<Box<T>>,
}

impl<T: IntrusivelyQueueable> IntrusiveQueue<T> {
    #[inline]
    pub const fn new() -> Self {
        IntrusiveQueue {
            front: None,
            back: None,
            len: 0,
            phantom: PhantomData,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.front.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Borrows the element at the front of the queue.
    pub fn peek(&self) -> Option<&T> {
        // Safety: linked elements stay alive until they are popped, and popping needs `&mut self`.
        self.front.map(|front: NonNull<T>| unsafe { &*front.as_ptr() })
    }

    /// Unlinks the element at the front of the queue and hands ownership back.
    pub fn pop_element(&mut self) -> Option<Box<T>> {
        let front: NonNull<T> = self.front?;

        // Safety: every linked pointer came from Box::into_raw in push_element and is owned by this queue.
        let popped: Box<T> = unsafe { Box::from_raw(front.as_ptr()) };
        self.front = popped.get_queue_next();
        if self.front.is_none() {
            self.back = None;
        }
        popped.set_queue_next(None);
        self.len -= 1;
        Some(popped)
    }

    /// Links `added` at the back of the queue.
    pub fn push_element(&mut self, added: Box<T>) {
        added.set_queue_next(None);
        let added: NonNull<T> = NonNull::from(Box::leak(added));

        match self.back {
            // Safety: the back element is owned by this queue and alive.
            Some(back) => unsafe { back.as_ref().set_queue_next(Some(added)) },
            None => self.front = Some(added),
        }
        self.back = Some(added);
        self.len += 1;
    }
}

impl<T: IntrusivelyQueueable> Default for IntrusiveQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Linked elements are raw pointers, so release them by hand.
impl<T: IntrusivelyQueueable> Drop for IntrusiveQueue<T> {
    fn drop(&mut self) {
        while self.pop_element().is_some() {}
    }
}

/// Types that carry the link storage for an [IntrusiveQueue].
pub trait IntrusivelyQueueable {
    fn get_queue_next(&self) -> Option<NonNull<Self>>;

    fn set_queue_next(&self, element: Option<NonNull<Self>>);
}
