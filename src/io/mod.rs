//! Reading and writing curve files.

pub mod curve;
