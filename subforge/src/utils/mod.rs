pub mod fs;
pub mod json;
