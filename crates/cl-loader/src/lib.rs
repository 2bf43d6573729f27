//! RPL loader for cafe-loader
//!
//! Opening an image runs three stages: [`reader`] validates the header and
//! maps the section table, [`planner`] sizes the load region, and
//! [`materializer`] reserves it and fills it with section contents.

pub mod elf;
pub mod library;
pub mod loader;
pub mod materializer;
pub mod planner;
pub mod reader;

// Re-export main types
pub use elf::{Elf32Header, Endian, SectionHeader};
pub use library::Library;
pub use loader::{ErrorSink, LibraryHandle, Loader, TracingSink};
pub use materializer::SectionMaterializer;
pub use planner::{AddressPlanner, LoadPlan, PlannedSection, SectionContent};
pub use reader::{ImageHeader, ImageReader, SectionTable};
