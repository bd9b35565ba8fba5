//! Change notification channel.

pub mod change_bus;
