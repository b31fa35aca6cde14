pub mod connection;

pub use connection::{AlarmNotice, AlarmTransition, Connection, EventMessage};
