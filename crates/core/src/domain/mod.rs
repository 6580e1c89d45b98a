pub mod draft;
pub mod identity;
pub mod message;
pub mod proposal;
pub mod session;
