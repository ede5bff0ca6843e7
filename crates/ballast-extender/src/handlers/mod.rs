pub mod extender;
pub mod health;

pub use extender::*;
pub use health::*;
