pub mod registry;
pub mod site;
pub mod user;
