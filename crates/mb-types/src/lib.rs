pub mod design;
pub mod errors;

pub use design::*;
pub use errors::*;
