//! Book inventory tracker.
//!
//! The [`app::Application`] wires settings, the SQLite pool, and the module
//! registry; [`modules::books`] holds the inventory domain.

pub mod app;
pub mod modules;

pub use app::Application;
pub use modules::books;
