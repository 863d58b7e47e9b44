pub const SUCCESS: i32 = 0;
/// Connection failed, the stream failed, or output could not be written
pub const EXECUTION_ERROR: i32 = 1;
/// Bad arguments, bad configuration, or an undecodable payload
pub const INPUT_ERROR: i32 = 2;
