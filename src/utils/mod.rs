pub mod math;
pub mod retry;
pub mod sanitize;
pub mod text;
