//! 准入 Webhook 模块
//!
//! 在 Application、Component 与 CustomCluster 写入前执行校验，保证自定义资源图的一致性。

mod server;
pub mod validation;

pub use server::{admit, create_webhook_router, run_webhook_server};
pub use validation::{
    validate_application, validate_component, validate_custom_cluster, ValidationContext, ValidationResult,
};
