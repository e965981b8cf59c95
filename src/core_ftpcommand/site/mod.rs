pub mod site_chmod;
pub mod site_help;
pub mod site_mfmt;
