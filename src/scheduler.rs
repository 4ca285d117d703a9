//! Cooperative run loop.
//!
//! Everything the engine defers goes through here: queued tasks run in FIFO order,
//! and suspended algorithms wait as (predicate, continuation) pairs that are
//! re-checked after every task. Nothing blocks; a waiter whose predicate never
//! becomes true simply stays registered.

use std::collections::VecDeque;

use log::{debug, trace};

use crate::env::Environment;
use crate::error::{Error, Result};
use crate::value::HostValue;

pub(crate) type Task<V> = Box<dyn FnOnce(&mut Environment<V>)>;
pub(crate) type Predicate<V> = Box<dyn Fn(&Environment<V>) -> bool>;

struct Waiter<V> {
    label: &'static str,
    predicate: Predicate<V>,
    continuation: Task<V>,
}

/// Task queue plus suspended continuations
pub(crate) struct Scheduler<V> {
    tasks: VecDeque<Task<V>>,
    waiters: Vec<Waiter<V>>,
}

impl<V> Scheduler<V> {
    pub(crate) fn new() -> Self {
        Scheduler {
            tasks: VecDeque::new(),
            waiters: Vec::new(),
        }
    }

    pub(crate) fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}

impl<V: HostValue> Environment<V> {
    /// Queue a task behind every task already queued
    pub(crate) fn queue_task(&mut self, task: impl FnOnce(&mut Environment<V>) + 'static) {
        self.scheduler.tasks.push_back(Box::new(task));
    }

    /// Suspend `continuation` until `predicate` holds. The predicate is first checked
    /// by the run loop, never inline.
    pub(crate) fn spin_until(
        &mut self,
        label: &'static str,
        predicate: impl Fn(&Environment<V>) -> bool + 'static,
        continuation: impl FnOnce(&mut Environment<V>) + 'static,
    ) {
        trace!("suspend: {}", label);
        self.scheduler.waiters.push(Waiter {
            label,
            predicate: Box::new(predicate),
            continuation: Box::new(continuation),
        });
    }

    /// Resume the first waiter whose predicate holds. Returns false if none is ready.
    fn resume_one(&mut self) -> bool {
        let ready = self
            .scheduler
            .waiters
            .iter()
            .position(|waiter| (waiter.predicate)(self));
        let Some(position) = ready else {
            return false;
        };

        let waiter = self.scheduler.waiters.remove(position);
        trace!("resume: {}", waiter.label);
        (waiter.continuation)(self);
        true
    }

    /// Run tasks and resume waiters until neither can make progress.
    ///
    /// Returns the number of steps taken. Fails with `OperationError` if the turn
    /// budget runs out, which means some handler keeps re-queueing work.
    pub fn run_until_idle(&mut self) -> Result<usize> {
        let mut turns = 0;
        loop {
            if turns >= self.max_turns {
                debug!("run loop stopped after {} turns", turns);
                return Err(Error::Operation("run loop exceeded its turn budget"));
            }

            if self.resume_one() {
                turns += 1;
                continue;
            }

            match self.scheduler.tasks.pop_front() {
                Some(task) => {
                    task(self);
                    turns += 1;
                }
                None => break,
            }
        }
        Ok(turns)
    }

    /// Whether queued tasks or ready waiters remain
    pub fn has_pending_work(&self) -> bool {
        self.scheduler.has_tasks()
            || self
                .scheduler
                .waiters
                .iter()
                .any(|waiter| (waiter.predicate)(self))
    }

    /// Number of suspended algorithms, ready or not
    pub fn suspended_count(&self) -> usize {
        self.scheduler.waiter_count()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::env::Environment;
    use crate::value::Value;

    #[test]
    fn tasks_run_in_fifo_order() {
        let mut env: Environment<Value> = Environment::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            env.queue_task(move |_| seen.borrow_mut().push(i));
        }
        assert_eq!(env.run_until_idle().unwrap(), 3);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn waiters_resume_once_their_predicate_holds() {
        let mut env: Environment<Value> = Environment::new();
        let flag = Rc::new(RefCell::new(false));
        let resumed = Rc::new(RefCell::new(false));

        let (f, r) = (flag.clone(), resumed.clone());
        env.spin_until("flag", move |_| *f.borrow(), move |_| *r.borrow_mut() = true);
        env.run_until_idle().unwrap();
        assert!(!*resumed.borrow());
        assert_eq!(env.suspended_count(), 1);

        *flag.borrow_mut() = true;
        env.run_until_idle().unwrap();
        assert!(*resumed.borrow());
        assert_eq!(env.suspended_count(), 0);
    }

    #[test]
    fn runaway_work_hits_the_turn_budget() {
        fn requeue(env: &mut Environment<Value>) {
            env.queue_task(requeue);
        }

        let mut env: Environment<Value> = Environment::new();
        env.set_max_turns(50);
        env.queue_task(requeue);
        assert_eq!(env.run_until_idle().unwrap_err().name(), "OperationError");
    }
}
