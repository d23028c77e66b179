//! 数据模型模块
//!
//! 该模块定义了编排系统中使用的核心数据模型，包括应用的组件引用、
//! 组件端口暴露声明、组件列表差异以及集群版本校验，并提供序列化/反序列化功能。

pub mod application;
pub mod cluster;
pub mod component;
pub mod diff;
