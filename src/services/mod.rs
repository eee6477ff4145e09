pub mod ai;
pub mod handlers;
pub mod queue;
pub mod retry;
