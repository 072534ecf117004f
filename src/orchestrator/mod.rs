//! Application-level orchestration.
//!
//! Presentation layers own the wizard and list state and send `UiCommand`s here; this
//! module executes the backend calls and the poll timer, and answers with `AppEvent`s.

mod controller;

pub(crate) use controller::{run_controller, AppEvent, Services, UiCommand};
