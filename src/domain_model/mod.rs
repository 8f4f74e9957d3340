mod clock;
mod token;
mod user;

pub use clock::*;
pub use token::*;
pub use user::*;
