pub mod actor;
pub mod assignment;
pub mod courier;
pub mod delivery;
pub mod order;
pub mod route;
pub mod page;
