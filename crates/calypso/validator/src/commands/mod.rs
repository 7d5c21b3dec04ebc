//! Command implementations for the validator CLI

mod backend;
mod console;
mod readers;
mod simulate;

pub(crate) use console::run_command;
pub(crate) use readers::list_command;
pub(crate) use simulate::simulate_command;
