pub mod business;
pub mod category;
pub mod enums;
pub mod hours;

pub use business::*;
pub use category::*;
pub use enums::*;
pub use hours::*;
