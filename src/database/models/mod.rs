pub mod grade;
pub mod notification;
pub mod user;

pub use grade::*;
pub use notification::*;
pub use user::*;
