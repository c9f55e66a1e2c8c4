pub mod escalation;
pub mod pagination;
pub mod permission;
pub mod role;
pub mod tenant;
pub mod user;
