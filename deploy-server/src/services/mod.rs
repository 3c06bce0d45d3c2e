pub mod site_registry;
pub mod static_files;
