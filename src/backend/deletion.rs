// Deletion queue - ordered teardown for manually managed GPU objects
//
// Every object created during init registers how to destroy itself right
// after creation. Flushing runs those actions newest-first, so an object is
// always destroyed before anything it was built from.

/// LIFO registry of teardown actions.
///
/// The queue also flushes when dropped, which unwinds a half-finished init
/// when an early `?` bails out.
#[derive(Default)]
pub struct DeletionQueue {
    deletors: Vec<Box<dyn FnOnce()>>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a teardown action at the tail
    pub fn push<F>(&mut self, deletor: F)
    where
        F: FnOnce() + 'static,
    {
        self.deletors.push(Box::new(deletor));
    }

    /// Run every registered action, newest first, then forget them
    pub fn flush(&mut self) {
        if self.deletors.is_empty() {
            return;
        }

        log::debug!("Flushing {} deletion actions", self.deletors.len());

        // pop() drains from the tail: reverse registration order
        while let Some(deletor) = self.deletors.pop() {
            deletor();
        }
    }

    pub fn len(&self) -> usize {
        self.deletors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deletors.is_empty()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn push_named(queue: &mut DeletionQueue, log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) {
        let log = Rc::clone(log);
        queue.push(move || log.borrow_mut().push(name));
    }

    #[test]
    fn flush_runs_in_reverse_order() {
        let log = recorder();
        let mut queue = DeletionQueue::new();

        push_named(&mut queue, &log, "A");
        push_named(&mut queue, &log, "B");
        push_named(&mut queue, &log, "C");
        assert_eq!(queue.len(), 3);

        queue.flush();

        assert_eq!(*log.borrow(), vec!["C", "B", "A"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn second_flush_invokes_nothing() {
        let log = recorder();
        let mut queue = DeletionQueue::new();

        for name in ["one", "two", "three", "four"] {
            push_named(&mut queue, &log, name);
        }

        queue.flush();
        queue.flush();

        assert_eq!(*log.borrow(), vec!["four", "three", "two", "one"]);
    }

    #[test]
    fn flushing_an_empty_queue_is_a_no_op() {
        let mut queue = DeletionQueue::new();
        queue.flush();
        queue.flush();
        assert!(queue.is_empty());
    }

    #[test]
    fn each_action_runs_exactly_once() {
        let counter = Rc::new(RefCell::new(0u32));
        let mut queue = DeletionQueue::new();

        for _ in 0..16 {
            let counter = Rc::clone(&counter);
            queue.push(move || *counter.borrow_mut() += 1);
        }

        queue.flush();
        queue.flush();
        drop(queue);

        assert_eq!(*counter.borrow(), 16);
    }

    #[test]
    fn drop_flushes_pending_actions() {
        let log = recorder();
        {
            let mut queue = DeletionQueue::new();
            push_named(&mut queue, &log, "swapchain");
            push_named(&mut queue, &log, "framebuffer");
        }

        assert_eq!(*log.borrow(), vec!["framebuffer", "swapchain"]);
    }

    #[test]
    fn actions_pushed_after_flush_run_on_next_flush() {
        let log = recorder();
        let mut queue = DeletionQueue::new();

        push_named(&mut queue, &log, "first");
        queue.flush();
        push_named(&mut queue, &log, "second");
        queue.flush();

        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }
}
