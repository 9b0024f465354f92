pub mod driver;
pub mod identity;
pub mod parcel;
pub mod records;
pub mod service;
pub mod validation;
