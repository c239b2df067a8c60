pub mod matrix;
pub mod structure;
