//! The simulation context for a single trajectory.
//!
//! A `Context` owns the simulated clock, the queue of plans pinned to a given
//! day and the data plugins in which every model component keeps its state.
//! Components expose their operations as extension traits on `Context`.
use std::any::{Any, TypeId};

use log::trace;

use crate::plan::{Id as PlanId, Queue};
use crate::{Day, HashMap, HashMapExt};

/// A component's state container. Declare one with [`define_data_plugin!`].
pub trait DataPlugin: Any {
    type DataContainer;

    fn create_data_container() -> Self::DataContainer;
}

/// Defines a data plugin `$plugin` whose container has type `$data_container`
/// and is initialised from `$default`.
#[macro_export]
macro_rules! define_data_plugin {
    ($plugin:ident, $data_container:ty, $default: expr) => {
        #[derive(Copy, Clone)]
        struct $plugin;

        impl $crate::context::DataPlugin for $plugin {
            type DataContainer = $data_container;

            fn create_data_container() -> Self::DataContainer {
                $default
            }
        }
    };
}
pub use define_data_plugin;

/// Plans scheduled for the same day run in phase order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExecutionPhase {
    First,
    Normal,
    Last,
}

type Callback = dyn FnOnce(&mut Context);

pub struct Context {
    plan_queue: Queue<Box<Callback>, ExecutionPhase>,
    data_plugins: HashMap<TypeId, Box<dyn Any>>,
    current_day: Day,
    shutdown_requested: bool,
}

impl Context {
    #[must_use]
    pub fn new() -> Context {
        Context {
            plan_queue: Queue::new(),
            data_plugins: HashMap::new(),
            current_day: 0,
            shutdown_requested: false,
        }
    }

    /// Schedules `callback` to run at the start of `day` in the normal phase.
    ///
    /// # Panics
    ///
    /// Panics if `day` is already in the past.
    pub fn add_plan(&mut self, day: Day, callback: impl FnOnce(&mut Context) + 'static) -> PlanId {
        self.add_plan_with_phase(day, callback, ExecutionPhase::Normal)
    }

    /// Schedules `callback` to run at the start of `day` in the given phase.
    ///
    /// # Panics
    ///
    /// Panics if `day` is already in the past.
    pub fn add_plan_with_phase(
        &mut self,
        day: Day,
        callback: impl FnOnce(&mut Context) + 'static,
        phase: ExecutionPhase,
    ) -> PlanId {
        assert!(
            day >= self.current_day,
            "Invalid plan day {day}: current day is {}",
            self.current_day
        );
        self.plan_queue.add_plan(day, Box::new(callback), phase)
    }

    pub fn cancel_plan(&mut self, id: &PlanId) {
        self.plan_queue.cancel_plan(id);
    }

    /// Number of plans still waiting to run.
    #[must_use]
    pub fn pending_plan_count(&self) -> usize {
        self.plan_queue.len()
    }

    /// Runs every plan due on or before the current day, including plans
    /// added by those plans for the current day.
    pub fn execute_due_plans(&mut self) {
        while let Some(plan) = self.plan_queue.get_next_plan_due(self.current_day) {
            trace!("executing plan scheduled for day {}", plan.day);
            (plan.data)(self);
        }
    }

    pub fn get_current_day(&self) -> Day {
        self.current_day
    }

    /// Moves the clock to the next day.
    pub fn advance_day(&mut self) {
        self.current_day += 1;
    }

    /// Sets the clock directly, used when resuming an imported state.
    pub fn set_current_day(&mut self, day: Day) {
        self.current_day = day;
    }

    /// Requests that the trajectory driving this context stop after the
    /// current day.
    pub fn shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Returns a mutable reference to the data container of `T`, creating it
    /// if it doesn't exist yet.
    pub fn get_data_mut<T: DataPlugin>(&mut self, _plugin: T) -> &mut T::DataContainer {
        self.data_plugins
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::create_data_container()))
            .downcast_mut::<T::DataContainer>()
            .unwrap() // Never panics: the container was created with the matching type
    }

    /// Returns a reference to the data container of `T`.
    ///
    /// # Panics
    ///
    /// Panics if the plugin has not been initialised with `get_data_mut`. Every
    /// model component initialises its plugin in its `init` function.
    pub fn get_data<T: DataPlugin>(&self, _plugin: T) -> &T::DataContainer {
        self.try_get_data::<T>().unwrap_or_else(|| {
            panic!(
                "data plugin {} has not been initialised",
                std::any::type_name::<T>()
            )
        })
    }

    /// Returns a reference to the data container of `T` if it exists.
    pub fn try_get_data<T: DataPlugin>(&self) -> Option<&T::DataContainer> {
        self.data_plugins
            .get(&TypeId::of::<T>())
            .and_then(|data| data.downcast_ref::<T::DataContainer>())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
