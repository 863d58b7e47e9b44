pub mod decode;
pub mod ports;
pub mod predict;
pub mod stream;
