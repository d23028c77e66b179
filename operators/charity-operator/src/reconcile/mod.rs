//! 资源协调模块
//!
//! 该模块实现 Application、Component 与 CustomCluster 的状态机。每个事件都是一次独立的
//! 转换：失败时记录日志并放弃当前转换，不回滚已完成的步骤。所有步骤都是
//! 幂等的（创建或替换、删除不存在的对象视为成功），因此重新投递同一事件
//! 可以从中断处继续。

mod application;
mod cluster;
mod component;
mod status;

use charity_common::Result;
use charity_controller::{ClusterApi, ClusterContext, ClusterLifecycle, ContextResolver, PeeringWorkflow};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::OperatorConfig;
use crate::crd::{Application, ClusterApiClusterStatus, Component, CustomCluster};
use crate::resources::{
    DeploymentReconciler, IngressAggregator, IngressReconciler, ManifestRenderer, NamespaceReconciler,
    ServiceMonitorReconciler, ServiceReconciler,
};

/// Application 事件
#[derive(Debug, Clone)]
pub enum ApplicationEvent {
    /// 新建
    Create(Application),
    /// 组件列表变化
    UpdateComponents {
        /// 变化前
        old: Application,
        /// 变化后
        new: Application,
    },
    /// 删除
    Delete(Application),
}

/// Component 事件
#[derive(Debug, Clone)]
pub enum ComponentEvent {
    /// 新建
    Create(Component),
    /// expose 以外的规范变化
    UpdateSpec {
        /// 变化前
        old: Component,
        /// 变化后
        new: Component,
    },
    /// expose 变化
    UpdateExpose {
        /// 变化前
        old: Component,
        /// 变化后
        new: Component,
    },
    /// 删除
    Delete(Component),
}

/// CustomCluster 事件
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    /// 新建
    Create(CustomCluster),
    /// 规范变化
    Update {
        /// 变化前
        old: CustomCluster,
        /// 变化后
        new: CustomCluster,
    },
    /// 删除
    Delete(CustomCluster),
    /// 同名 ClusterAPI Cluster 的状态变化
    Observed {
        /// 集群名称
        name: String,
        /// ClusterAPI 状态
        status: ClusterApiClusterStatus,
    },
}

impl ClusterEvent {
    fn name(&self) -> &str {
        match self {
            ClusterEvent::Create(cluster) | ClusterEvent::Delete(cluster) => &cluster.spec.name,
            ClusterEvent::Update { new, .. } => &new.spec.name,
            ClusterEvent::Observed { name, .. } => name,
        }
    }
}

/// 自定义资源事件
#[derive(Debug, Clone)]
pub enum CrEvent {
    /// Application 事件
    Application(ApplicationEvent),
    /// Component 事件
    Component(ComponentEvent),
    /// CustomCluster 事件
    Cluster(ClusterEvent),
}

impl CrEvent {
    /// 串行化键：应用事件按应用名，集群事件按 `cluster/<名称>`
    ///
    /// 应用名是 DNS 标签，不含 `/`，两类键不会重叠。
    pub fn key(&self) -> String {
        match self {
            CrEvent::Application(event) => match event {
                ApplicationEvent::Create(app) | ApplicationEvent::Delete(app) => app.spec.name.clone(),
                ApplicationEvent::UpdateComponents { new, .. } => new.spec.name.clone(),
            },
            CrEvent::Component(event) => match event {
                ComponentEvent::Create(c) | ComponentEvent::Delete(c) => c.spec.application.clone(),
                ComponentEvent::UpdateSpec { new, .. } | ComponentEvent::UpdateExpose { new, .. } => {
                    new.spec.application.clone()
                }
            },
            CrEvent::Cluster(event) => format!("cluster/{}", event.name()),
        }
    }

    /// 事件的简短描述
    pub fn describe(&self) -> String {
        match self {
            CrEvent::Application(event) => match event {
                ApplicationEvent::Create(app) => format!("创建应用 {}", app.spec.name),
                ApplicationEvent::UpdateComponents { new, .. } => format!("更新应用 {} 的组件", new.spec.name),
                ApplicationEvent::Delete(app) => format!("删除应用 {}", app.spec.name),
            },
            CrEvent::Component(event) => match event {
                ComponentEvent::Create(c) => format!("创建组件 {}/{}", c.spec.application, c.spec.name),
                ComponentEvent::UpdateSpec { new, .. } => {
                    format!("更新组件 {}/{} 的规范", new.spec.application, new.spec.name)
                }
                ComponentEvent::UpdateExpose { new, .. } => {
                    format!("更新组件 {}/{} 的端口", new.spec.application, new.spec.name)
                }
                ComponentEvent::Delete(c) => format!("删除组件 {}/{}", c.spec.application, c.spec.name),
            },
            CrEvent::Cluster(event) => match event {
                ClusterEvent::Create(c) => format!("创建集群 {}", c.spec.name),
                ClusterEvent::Update { new, .. } => format!("更新集群 {}", new.spec.name),
                ClusterEvent::Delete(c) => format!("删除集群 {}", c.spec.name),
                ClusterEvent::Observed { name, .. } => format!("同步集群 {} 的状态", name),
            },
        }
    }
}

/// 协调器结构体
pub struct Reconciler {
    config: Arc<OperatorConfig>,
    resolver: Arc<dyn ContextResolver>,
    api: Arc<dyn ClusterApi>,
    peering: Arc<dyn PeeringWorkflow>,
    lifecycle: Arc<dyn ClusterLifecycle>,
    namespaces: NamespaceReconciler,
    deployments: DeploymentReconciler,
    services: ServiceReconciler,
    monitors: ServiceMonitorReconciler,
    ingress: IngressAggregator,
}

impl Reconciler {
    /// 创建新的协调器，所有协作者在构造时注入
    pub fn new(
        config: Arc<OperatorConfig>,
        resolver: Arc<dyn ContextResolver>,
        api: Arc<dyn ClusterApi>,
        renderer: Arc<dyn ManifestRenderer>,
        peering: Arc<dyn PeeringWorkflow>,
        lifecycle: Arc<dyn ClusterLifecycle>,
    ) -> Self {
        let ingress = IngressReconciler::new(
            api.clone(),
            renderer.clone(),
            config.ingress_domain.clone(),
            config.ingress_class.clone(),
        );

        Self {
            namespaces: NamespaceReconciler::new(api.clone(), renderer.clone()),
            deployments: DeploymentReconciler::new(api.clone(), renderer.clone()),
            services: ServiceReconciler::new(api.clone(), renderer.clone()),
            monitors: ServiceMonitorReconciler::new(api.clone(), renderer),
            ingress: IngressAggregator::new(Arc::new(ingress)),
            config,
            resolver,
            api,
            peering,
            lifecycle,
        }
    }

    /// 处理一个事件
    pub async fn handle(&self, event: &CrEvent) -> Result<()> {
        info!("开始处理: {}", event.describe());

        let result = match event {
            CrEvent::Application(event) => match event {
                ApplicationEvent::Create(app) => self.create_application(app).await,
                ApplicationEvent::UpdateComponents { old, new } => self.update_components(old, new).await,
                ApplicationEvent::Delete(app) => self.delete_application(app).await,
            },
            CrEvent::Component(event) => match event {
                ComponentEvent::Create(c) => self.create_component(c).await,
                ComponentEvent::UpdateSpec { old, new } => self.update_component_spec(old, new).await,
                ComponentEvent::UpdateExpose { old, new } => self.update_component_expose(old, new).await,
                ComponentEvent::Delete(c) => self.delete_component(c).await,
            },
            CrEvent::Cluster(event) => match event {
                ClusterEvent::Create(c) => self.create_cluster(c).await,
                ClusterEvent::Update { old, new } => self.update_cluster(old, new).await,
                ClusterEvent::Delete(c) => self.delete_cluster(c).await,
                ClusterEvent::Observed { name, status } => {
                    self.cluster_observed(name, status).await;
                    Ok(())
                }
            },
        };

        match &result {
            Ok(()) => info!("处理完成: {}", event.describe()),
            Err(e) => {
                error!("处理失败，放弃当前转换: {}: {}", event.describe(), e);
                self.record_failure(event, e).await;
            }
        }
        result
    }

    fn management(&self) -> Result<ClusterContext> {
        self.resolver.management()
    }
}
