//! A priority queue that stores arbitrary data sorted by simulated day
//!
//! Defines a `Queue<T, P>` that stores items of type `T` sorted by `Day` and a
//! definable priority `P`, called 'plans'. Adding a plan is *O*(log(*n*)) while
//! cancellation is *O*(1).
//!
//! `Context` uses this queue for events pinned to a given day, such as the
//! infection and strain introductions scheduled for the start of a snapshot
//! window.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::{Day, HashMap, HashMapExt};

/// A priority queue that stores arbitrary data sorted by day
///
/// Items of type `T` are stored in order by day and called `Plan<T>`.
/// Plans can have priorities given by some specified orderable type `P`.
/// When plans are created they are sequentially assigned an `Id` that is a
/// wrapped `u64`. If two plans are scheduled for the same day then the plan
/// with the lowest priority is placed earlier. If two plans have the same day
/// and priority then the plan that is scheduled first (i.e., that has the
/// lowest id) is placed earlier.
pub struct Queue<T, P: Eq + PartialEq + Ord> {
    queue: BinaryHeap<Entry<P>>,
    data_map: HashMap<u64, T>,
    plan_counter: u64,
}

impl<T, P: Eq + PartialEq + Ord> Queue<T, P> {
    /// Create a new empty `Queue<T>`
    #[must_use]
    pub fn new() -> Queue<T, P> {
        Queue {
            queue: BinaryHeap::new(),
            data_map: HashMap::new(),
            plan_counter: 0,
        }
    }

    /// Add a plan to the queue on the specified day
    ///
    /// Returns an `Id` for the newly-added plan that can be used to cancel it
    /// if needed.
    pub fn add_plan(&mut self, day: Day, data: T, priority: P) -> Id {
        let id = self.plan_counter;
        self.queue.push(Entry { day, id, priority });
        self.data_map.insert(id, data);
        self.plan_counter += 1;
        Id { id }
    }

    /// Cancel a plan that has been added to the queue
    ///
    /// # Panics
    ///
    /// This function panics if you cancel a plan which has already
    /// been cancelled or executed.
    pub fn cancel_plan(&mut self, id: &Id) {
        // The entry stays in the heap and is skipped when popped.
        self.data_map.remove(&id.id).expect("Plan does not exist");
    }

    /// Returns the day of the earliest live plan without removing it.
    pub fn next_day(&mut self) -> Option<Day> {
        while let Some(entry) = self.queue.peek() {
            if self.data_map.contains_key(&entry.id) {
                return Some(entry.day);
            }
            self.queue.pop();
        }
        None
    }

    /// Retrieve the earliest plan in the queue
    ///
    /// Returns the next plan if it exists or else `None` if the queue is empty
    pub fn get_next_plan(&mut self) -> Option<Plan<T>> {
        while let Some(entry) = self.queue.pop() {
            if let Some(data) = self.data_map.remove(&entry.id) {
                return Some(Plan {
                    day: entry.day,
                    data,
                });
            }
        }
        None
    }

    /// Retrieve the earliest plan if it is due on or before `day`.
    pub fn get_next_plan_due(&mut self, day: Day) -> Option<Plan<T>> {
        match self.next_day() {
            Some(next) if next <= day => self.get_next_plan(),
            _ => None,
        }
    }

    /// Number of live (not cancelled, not executed) plans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data_map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data_map.is_empty()
    }
}

impl<T, P: Eq + PartialEq + Ord> Default for Queue<T, P> {
    fn default() -> Self {
        Self::new()
    }
}

/// A day, id, and priority object used to order plans in the `Queue<T>`
#[derive(PartialEq, Debug)]
struct Entry<P: Eq + PartialEq + Ord> {
    day: Day,
    id: u64,
    priority: P,
}

impl<P: Eq + PartialEq + Ord> Eq for Entry<P> {}

impl<P: Eq + PartialEq + Ord> PartialOrd for Entry<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Entry objects are ordered in increasing order by day, priority, and then
/// plan id. `BinaryHeap` is a max-heap, hence the reversals.
impl<P: Eq + PartialEq + Ord> Ord for Entry<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.day
            .cmp(&other.day)
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| self.id.cmp(&other.id))
            .reverse()
    }
}

/// A unique identifier for a plan added to a `Queue<T>`
#[derive(Debug)]
pub struct Id {
    id: u64,
}

/// A plan that holds data of type `T` intended to be used on the specified day
pub struct Plan<T> {
    pub day: Day,
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::Queue;

    #[test]
    fn empty_queue() {
        let mut plan_queue = Queue::<(), ()>::new();
        assert!(plan_queue.get_next_plan().is_none());
        assert!(plan_queue.is_empty());
    }

    #[test]
    fn add_plans() {
        let mut plan_queue = Queue::new();
        plan_queue.add_plan(1, 1, ());
        plan_queue.add_plan(3, 3, ());
        plan_queue.add_plan(2, 2, ());

        for expected in 1..=3 {
            let next_plan = plan_queue.get_next_plan().unwrap();
            assert_eq!(next_plan.day, expected);
            assert_eq!(next_plan.data, expected);
        }
        assert!(plan_queue.get_next_plan().is_none());
    }

    #[test]
    fn add_plans_on_same_day_with_different_priority() {
        let mut plan_queue = Queue::new();
        plan_queue.add_plan(1, 1, 1);
        plan_queue.add_plan(1, 2, 0);

        assert_eq!(plan_queue.get_next_plan().unwrap().data, 2);
        assert_eq!(plan_queue.get_next_plan().unwrap().data, 1);
    }

    #[test]
    fn same_day_same_priority_fire_in_insertion_order() {
        let mut plan_queue = Queue::new();
        plan_queue.add_plan(4, "a", ());
        plan_queue.add_plan(4, "b", ());
        assert_eq!(plan_queue.get_next_plan().unwrap().data, "a");
        assert_eq!(plan_queue.get_next_plan().unwrap().data, "b");
    }

    #[test]
    fn cancelled_plans_are_skipped() {
        let mut plan_queue = Queue::new();
        plan_queue.add_plan(1, 1, ());
        let plan_to_cancel = plan_queue.add_plan(2, 2, ());
        plan_queue.add_plan(3, 3, ());
        plan_queue.cancel_plan(&plan_to_cancel);
        assert_eq!(plan_queue.len(), 2);

        assert_eq!(plan_queue.get_next_plan().unwrap().data, 1);
        assert_eq!(plan_queue.next_day(), Some(3));
        assert_eq!(plan_queue.get_next_plan().unwrap().data, 3);
    }

    #[test]
    fn only_due_plans_are_returned() {
        let mut plan_queue = Queue::new();
        plan_queue.add_plan(5, 5, ());
        assert!(plan_queue.get_next_plan_due(4).is_none());
        assert_eq!(plan_queue.get_next_plan_due(5).unwrap().data, 5);
    }

    #[test]
    #[should_panic(expected = "Plan does not exist")]
    fn cancel_invalid_plan() {
        let mut plan_queue = Queue::new();
        let plan_to_cancel = plan_queue.add_plan(1, (), ());
        plan_queue.get_next_plan();
        plan_queue.cancel_plan(&plan_to_cancel);
    }
}
