//! 跨集群对等连接模块
//!
//! 当应用的组件分布在多个集群上时，需要在应用集群与组件集群之间建立
//! 网络对等连接，并把应用命名空间卸载（offload）到远端集群。
//! 该模块定义对等工作流接口与集群生命周期接口，并提供基于外部命令的实现。

mod lifecycle;
mod orchestrator;

pub use lifecycle::{ClusterLifecycle, ClusterSpec, CommandConfig, CommandLifecycle};
pub use orchestrator::PeeringOrchestrator;

#[cfg(any(test, feature = "testing"))]
pub use lifecycle::MockClusterLifecycle;

use async_trait::async_trait;
use charity_common::Result;
use std::fmt;

/// 一条对等链接：应用集群（本地）与组件集群（远端）之间，服务于一个应用命名空间
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeeringLink {
    /// 被卸载的应用命名空间
    pub namespace: String,
    /// 应用所在集群
    pub local: String,
    /// 组件所在集群
    pub remote: String,
}

impl PeeringLink {
    /// 创建新的对等链接
    pub fn new(namespace: impl Into<String>, local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
            remote: remote.into(),
        }
    }
}

impl fmt::Display for PeeringLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} <-> {}", self.namespace, self.local, self.remote)
    }
}

/// 组件迁移请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    /// 应用名称
    pub application: String,
    /// 组件名称
    pub component: String,
    /// 原集群
    pub old_cluster: String,
    /// 新集群
    pub new_cluster: String,
}

/// 对等工作流
///
/// - `establish`：调用前两个集群都必须可解析；成功后远端集群可以调度
///   应用命名空间中的工作负载。重复调用是安全的。
/// - `release`：撤销命名空间卸载；`unpeer` 为真时再断开集群对等。
///   调用方负责确认没有其他应用仍依赖这对集群。
/// - `migrate`：把组件的工作负载从原集群迁移到新集群。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PeeringWorkflow: Send + Sync {
    /// 建立对等连接并卸载命名空间
    async fn establish(&self, link: &PeeringLink) -> Result<()>;

    /// 撤销命名空间卸载，按需断开对等连接
    async fn release(&self, link: &PeeringLink, unpeer: bool) -> Result<()>;

    /// 迁移组件
    async fn migrate(&self, request: &MigrationRequest) -> Result<()>;
}
