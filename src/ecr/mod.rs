// AWS ECR registry: repository lifecycle, retention policy and authorization tokens

mod manager;
pub mod policy;

pub use manager::EcrRegistry;
