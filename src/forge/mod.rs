pub mod classify;
pub mod invoker;
pub mod project;
