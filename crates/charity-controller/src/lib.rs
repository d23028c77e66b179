//! CHARITY 控制平面基础设施
//!
//! 该模块实现编排系统与多个 Kubernetes 集群交互所需的基础能力：
//! 逻辑集群名到 kubeconfig 上下文的解析、按上下文访问集群 API，
//! 以及跨集群对等连接与集群生命周期的编排。
//! 使用 kube-rs 框架与 Kubernetes API 交互。

pub mod cluster;
pub mod peering;
pub mod utils;

pub use cluster::{ClusterApi, ClusterContext, ContextResolver, KubeClusterApi, KubeconfigResolver};
pub use peering::{
    ClusterLifecycle, ClusterSpec, CommandLifecycle, MigrationRequest, PeeringLink,
    PeeringOrchestrator, PeeringWorkflow,
};

#[cfg(any(test, feature = "testing"))]
pub use cluster::memory::InMemoryClusterApi;
#[cfg(any(test, feature = "testing"))]
pub use cluster::MockContextResolver;
#[cfg(any(test, feature = "testing"))]
pub use peering::{MockClusterLifecycle, MockPeeringWorkflow};
