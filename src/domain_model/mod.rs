mod claim;
mod login;
mod user;

pub use claim::*;
pub use login::*;
pub use user::*;
