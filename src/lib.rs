//! Driver core for Systemair SAVE ventilation units.
//!
//! Units are reached over one of several transports (see [`connection`]) and driven through
//! a [`device::Device`], which polls them, folds readings into a snapshot and reports changes
//! on an [`events::EventBus`].

pub mod commands;
pub mod connection;
pub mod device;
pub mod events;
pub mod modbus;
pub mod output;
pub mod queue;
pub mod reconciler;
pub mod registers;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod temporary_mode;
