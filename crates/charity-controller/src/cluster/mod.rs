//! 集群访问模块
//!
//! 该模块负责把逻辑集群名解析为可用的集群上下文，并定义按上下文访问
//! 目标集群 API 的统一接口。所有子资源协调器都只接收已解析的
//! [`ClusterContext`]，解析只发生在控制器入口。

mod api;
mod resolver;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use api::{kube_error, ClusterApi, KubeClusterApi};
pub use resolver::{ContextResolver, KubeconfigResolver};

#[cfg(any(test, feature = "testing"))]
pub use resolver::MockContextResolver;

use std::fmt;

/// 已解析的集群上下文
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterContext {
    /// 逻辑集群名
    pub cluster: String,
    /// kubeconfig 中的上下文名，`None` 表示使用默认配置（集群内或当前上下文）
    pub context: Option<String>,
}

impl ClusterContext {
    /// 创建指向指定 kubeconfig 上下文的集群上下文
    pub fn new(cluster: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            context: Some(context.into()),
        }
    }

    /// 创建使用默认客户端配置的集群上下文
    pub fn inferred(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            context: None,
        }
    }
}

impl fmt::Display for ClusterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{}({})", self.cluster, context),
            None => write!(f, "{}(默认)", self.cluster),
        }
    }
}
