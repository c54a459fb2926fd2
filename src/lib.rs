pub mod api;
pub mod db;
pub mod insights;
pub mod llm;
pub mod planner;
pub mod record;
pub mod store;
pub mod sync;
