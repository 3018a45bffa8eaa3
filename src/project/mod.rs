pub mod layout;
pub mod references;
pub mod solidity;
pub mod source;
