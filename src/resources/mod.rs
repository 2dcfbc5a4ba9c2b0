mod webapp;

pub use webapp::*;
