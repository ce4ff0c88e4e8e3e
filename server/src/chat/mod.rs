pub mod broadcast;
pub mod presence;
pub mod registry;
pub mod router;
