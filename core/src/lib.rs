//! # Mealshare Core
//!
//! Core traits and types shared by the mealshare crates.
//!
//! Business rules live in reducers: pure functions that look at the current
//! state, decide which events a command produces, and fold those events back
//! into state. Everything that touches the outside world (clocks, storage,
//! payment gateways) is injected through an environment.
//!
//! ## Core Concepts
//!
//! - **State**: A snapshot of the rows a command operates on
//! - **Command**: A request to change state (`Claim`, `ConfirmPayment`, ...)
//! - **Event**: A fact the reducer decided on (`Claimed`, `PaymentCompleted`, ...)
//! - **Reducer**: `handle(State, Command, Environment) → Result<Events, Error>` plus `apply(State, Event)`
//! - **Environment**: Injected dependencies via traits
//!
//! ## Example
//!
//! ```
//! use mealshare_core::reducer::{Events, Reducer};
//! use mealshare_core::smallvec;
//!
//! #[derive(Clone, Debug, Default)]
//! struct Counter {
//!     remaining: u32,
//! }
//!
//! enum CounterCommand {
//!     Take,
//! }
//!
//! #[derive(Debug, PartialEq)]
//! enum CounterEvent {
//!     Taken,
//! }
//!
//! struct CounterReducer;
//!
//! impl Reducer for CounterReducer {
//!     type State = Counter;
//!     type Command = CounterCommand;
//!     type Event = CounterEvent;
//!     type Error = String;
//!     type Environment = ();
//!
//!     fn handle(
//!         &self,
//!         state: &Counter,
//!         command: CounterCommand,
//!         _env: &(),
//!     ) -> Result<Events<CounterEvent>, String> {
//!         match command {
//!             CounterCommand::Take if state.remaining == 0 => Err("empty".to_string()),
//!             CounterCommand::Take => Ok(smallvec![CounterEvent::Taken]),
//!         }
//!     }
//!
//!     fn apply(&self, state: &mut Counter, event: &CounterEvent) {
//!         match event {
//!             CounterEvent::Taken => state.remaining -= 1,
//!         }
//!     }
//! }
//!
//! let mut state = Counter { remaining: 1 };
//! assert!(CounterReducer.reduce(&mut state, CounterCommand::Take, &()).is_ok());
//! assert!(CounterReducer.reduce(&mut state, CounterCommand::Take, &()).is_err());
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

/// Reducer module - The core trait for business logic
///
/// Reducers are split in two halves:
///
/// - `handle` validates a command against the current state and returns the
///   events it produces, or a typed error. It never mutates.
/// - `apply` folds one event into state. It is infallible: every check has
///   already happened in `handle`.
///
/// Keeping the halves apart lets a caller persist the events inside a storage
/// transaction before anything is applied, and discard everything if the
/// transaction fails.
pub mod reducer {
    use smallvec::SmallVec;

    /// Events produced by a single command.
    ///
    /// Most commands produce one or two events, so they stay on the stack.
    pub type Events<E> = SmallVec<[E; 4]>;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Command`: The requests this reducer accepts
    /// - `Event`: The facts this reducer records
    /// - `Error`: Why a command was refused
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The command type this reducer processes
        type Command;

        /// The event type this reducer produces
        type Event;

        /// The error returned when a command is refused
        type Error;

        /// The environment type with injected dependencies
        type Environment;

        /// Decide which events a command produces.
        ///
        /// An empty event list means the command was accepted but changes
        /// nothing (an idempotent replay, for instance).
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the command is not allowed in the
        /// current state. State is left untouched.
        fn handle(
            &self,
            state: &Self::State,
            command: Self::Command,
            env: &Self::Environment,
        ) -> Result<Events<Self::Event>, Self::Error>;

        /// Fold an event into state.
        fn apply(&self, state: &mut Self::State, event: &Self::Event);

        /// Handle a command and apply the resulting events in one step.
        ///
        /// # Errors
        ///
        /// Propagates the error from [`Reducer::handle`]; state is unchanged
        /// in that case.
        fn reduce(
            &self,
            state: &mut Self::State,
            command: Self::Command,
            env: &Self::Environment,
        ) -> Result<Events<Self::Event>, Self::Error> {
            let events = self.handle(state, command, env)?;
            for event in &events {
                self.apply(state, event);
            }
            Ok(events)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    ///
    /// // Test - fixed time for deterministic tests
    /// let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(time));
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock implementation of [`Clock`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
