//! Code signing adapters

mod codesign;

pub use codesign::CodesignSigner;
