pub mod client;
pub mod device_registry;
pub mod feedback_tracker;
pub mod router;
pub mod topic_contract;
