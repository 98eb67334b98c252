use std::collections::VecDeque;

use scheduler::Tid;

/// A handle to a semaphore created with [`crate::Thread::sema_init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sema(pub(crate) usize);

/// A counting semaphore whose waiters are woken in FIFO order.
///
/// `up` hands the unit straight to the first waiter instead of
/// incrementing the value, so a woken thread never has to retry.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    value: usize,
    waiters: VecDeque<Tid>,
}

impl Semaphore {
    pub(crate) fn new(value: usize) -> Self {
        Semaphore {
            value,
            waiters: VecDeque::new(),
        }
    }

    /// Returns `false` if `tid` has to block.
    pub(crate) fn down(&mut self, tid: Tid) -> bool {
        if self.value > 0 {
            self.value -= 1;
            true
        } else {
            self.waiters.push_back(tid);
            false
        }
    }

    /// Returns the waiter to wake, if any.
    pub(crate) fn up(&mut self) -> Option<Tid> {
        let waiter = self.waiters.pop_front();
        if waiter.is_none() {
            self.value += 1;
        }
        waiter
    }
}
