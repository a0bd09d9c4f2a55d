// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    collections::intrusive::{
        IntrusiveQueue,
        IntrusivelyQueueable,
    },
    condition_variable::ConditionVariable,
};
use ::std::cell::RefCell;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Unbounded core-local list of reusable objects linked through their own storage. Popping from an empty list
/// suspends the caller until something is pushed.
pub struct ReuseList<T: IntrusivelyQueueable> {
    list: RefCell<IntrusiveQueue<T>>,
    nonempty: ConditionVariable,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T: IntrusivelyQueueable> ReuseList<T> {
    pub fn new() -> Self {
        Self {
            list: RefCell::new(IntrusiveQueue::new()),
            nonempty: ConditionVariable::new(),
        }
    }

    pub fn push(&self, item: Box<T>) {
        self.list.borrow_mut().push_element(item);
        self.nonempty.signal();
    }

    pub fn try_pop(&self) -> Option<Box<T>> {
        self.list.borrow_mut().pop_element()
    }

    pub async fn block_until_pop(&self) -> Box<T> {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.nonempty.wait().await;
        }
    }

    /// Waits until the list holds something, or until [ReuseList::wake_all] is called.
    pub async fn wait_nonempty(&self) {
        if self.is_empty() {
            self.nonempty.wait().await;
        }
    }

    /// Releases every Worker blocked on this list. Workers in [ReuseList::block_until_pop] go back to waiting if the
    /// list is still empty.
    pub fn wake_all(&self) -> usize {
        self.nonempty.broadcast()
    }

    pub fn len(&self) -> usize {
        self.list.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.borrow().is_empty()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T: IntrusivelyQueueable> Default for ReuseList<T> {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::ReuseList;
    use crate::runtime::{
        collections::intrusive::IntrusivelyQueueable,
        scheduler::{
            scheduler::tests::{
                install_scheduler,
                run_scheduler,
            },
            TaskingScheduler,
        },
    };
    use ::anyhow::Result;
    use ::futures::FutureExt;
    use ::std::{
        cell::{
            Cell,
            RefCell,
        },
        ptr::NonNull,
        rc::Rc,
    };

    struct Item {
        next: Cell<Option<NonNull<Item>>>,
        id: usize,
    }

    impl IntrusivelyQueueable for Item {
        fn get_queue_next(&self) -> Option<NonNull<Self>> {
            self.next.get()
        }

        fn set_queue_next(&self, element: Option<NonNull<Self>>) {
            self.next.set(element);
        }
    }

    fn item(id: usize) -> Box<Item> {
        Box::new(Item {
            next: Cell::new(None),
            id,
        })
    }

    #[test]
    fn push_pop() -> Result<()> {
        let list: ReuseList<Item> = ReuseList::new();
        crate::ensure_eq!(list.try_pop().is_none(), true);
        list.push(item(1));
        list.push(item(2));
        crate::ensure_eq!(list.len(), 2);
        crate::ensure_eq!(list.try_pop().map(|i| i.id), Some(1));
        crate::ensure_eq!(list.try_pop().map(|i| i.id), Some(2));
        crate::ensure_eq!(list.is_empty(), true);
        Ok(())
    }

    #[test]
    fn block_until_pop_waits_for_push() -> Result<()> {
        let scheduler: Rc<TaskingScheduler> = install_scheduler(0);
        let list: Rc<ReuseList<Item>> = Rc::new(ReuseList::new());
        let popped: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));

        for _ in 0..2 {
            let list: Rc<ReuseList<Item>> = list.clone();
            let popped: Rc<RefCell<Vec<usize>>> = popped.clone();
            scheduler.spawn(
                "popper",
                async move {
                    let item: Box<Item> = list.block_until_pop().await;
                    popped.borrow_mut().push(item.id);
                }
                .boxed_local(),
            );
        }
        let pusher: Rc<ReuseList<Item>> = list.clone();
        scheduler.spawn(
            "pusher",
            async move {
                pusher.push(item(10));
                pusher.push(item(20));
            }
            .boxed_local(),
        );
        run_scheduler(scheduler);

        let mut popped: Vec<usize> = popped.borrow().clone();
        popped.sort();
        crate::ensure_eq!(popped, vec![10, 20]);
        crate::ensure_eq!(list.is_empty(), true);
        Ok(())
    }
}
