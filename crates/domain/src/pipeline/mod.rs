pub mod compiler;
pub mod tables;
