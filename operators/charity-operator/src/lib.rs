//! CHARITY Operator - 多集群应用编排的 Kubernetes Operator
//!
//! 该模块监听管理集群中的 Application 与 Component 自定义资源，
//! 把它们协调为工作负载集群中的 Namespace、Deployment、Service、
//! ServiceMonitor 与 Ingress，并在组件跨集群放置时编排集群对等连接
//! 与命名空间卸载。启用集群创建时还根据 CustomCluster 创建、扩缩与销毁
//! 工作负载集群，并同步 ClusterAPI 集群状态。

pub mod config;
pub mod controller;
pub mod crd;
pub mod event_handler;
pub mod reconcile;
pub mod resources;
pub mod webhook;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::OperatorConfig;

/// Operator 主结构体
pub struct CharityOperator {
    /// 控制器
    controller: Arc<RwLock<controller::Controller>>,
}

impl CharityOperator {
    /// 创建新的 Operator 实例
    pub fn new(config: OperatorConfig) -> Result<Self> {
        let controller = controller::create_default_controller(config)?;

        Ok(Self {
            controller: Arc::new(RwLock::new(controller)),
        })
    }

    /// 启动 Operator
    pub async fn start(&self) -> Result<()> {
        self.controller.write().await.start().await
    }

    /// 停止 Operator
    pub async fn stop(&self) -> Result<()> {
        self.controller.write().await.stop().await
    }

    /// 是否正在运行
    pub async fn is_running(&self) -> bool {
        self.controller.read().await.is_running().await
    }
}
