pub mod inference;
pub mod job;
pub mod serve;
pub mod weights;
