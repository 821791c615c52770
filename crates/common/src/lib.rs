pub mod cursor;
pub mod domain;
pub mod error;

pub use cursor::CursorPosition;
pub use domain::{Condition, Domain, Operator};
