mod core;
pub mod layout;
pub mod options;

pub use self::core::SpotstackRuntime;
pub use layout::{FilesystemLayout, PackageLayout};
pub use options::{CloudOptions, SpotstackOptions};
