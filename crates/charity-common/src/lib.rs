//! CHARITY Common - 跨模块共享工具与数据结构
//!
//! 该模块提供编排系统中所有组件共享的数据结构、错误处理和纯函数逻辑。
//! 包括组件引用、端口暴露声明等数据模型，组件列表差异计算，
//! 以及统一的错误处理机制。

pub mod models;
pub mod error;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
pub use models::application::*;
pub use models::cluster::*;
pub use models::component::*;
pub use models::diff::*;
