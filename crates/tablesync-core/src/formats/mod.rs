//! Wire-format shapes of the supported table formats.
//!
//! These modules know file names and serialization layouts, nothing about
//! canonical translation. The source and target adapters share them so a
//! commit written by the target side is readable by the source side.
pub mod delta_log;
pub mod hudi_timeline;
pub mod iceberg_meta;
