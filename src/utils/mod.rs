pub mod math;
pub mod retry;
