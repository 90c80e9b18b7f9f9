pub mod camera_directory;
pub mod config;
pub mod startup;
