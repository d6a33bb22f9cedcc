pub mod driver;
pub mod plugin;

pub use driver::{Driver, DriverConfig, SessionFactory};
