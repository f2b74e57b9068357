//! ag330 - AeroGennis A330-300 installer for X-Plane
//!
//! Downloads the aircraft package and its liveries from a trusted host,
//! extracts them into the X-Plane tree and keeps the livery list current.

pub mod archive;
pub mod catalog;
pub mod console;
pub mod downloaders;
pub mod installer;
pub mod menu;
pub mod paths;
pub mod settings;
