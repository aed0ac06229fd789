pub mod identity;
pub mod link;
pub mod monitor;
