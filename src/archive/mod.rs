//! Unpacking downloaded artifacts.

mod zip;

pub use zip::ZipExtractor;
