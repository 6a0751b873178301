//! Core Data Model
//!
//! Session identities, descriptors, creation settings and the property bag.
//! Nothing in here performs I/O.

pub mod descriptor;
pub mod property;
pub mod settings;
