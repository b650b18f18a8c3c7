// Recurring task execution
//
// One runner drives one callback at one fixed interval until stopped or
// disposed.

pub mod recurring;

pub use recurring::{RecurringRunner, RunnerError};
