//! 自定义资源定义模块
//!
//! 该模块定义了 CHARITY 的自定义资源：Application、Component 与 CustomCluster。
//! 它们都保存在管理集群中，由 Operator 协调为工作负载集群中的具体对象。
//! 另外定义了 ClusterAPI `Cluster` 的只读视图，用于把集群状态同步到 CustomCluster。

use charity_common::{ComponentRef, EnvVar, ExposePort};
use charity_controller::ClusterSpec;
use chrono::{DateTime, Utc};
use kube::api::ApiResource;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CRD 所属的 API 组
pub const GROUP: &str = "charity-project.eu";

/// 应用规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(group = "charity-project.eu", version = "v1", kind = "Application", plural = "applications", namespaced)]
#[kube(status = "ApplicationStatus")]
#[kube(printcolumn = r#"{"name":"集群", "type":"string", "jsonPath":".spec.cluster"}"#)]
#[kube(printcolumn = r#"{"name":"状态", "type":"string", "jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"上次更新", "type":"date", "jsonPath":".status.lastUpdated"}"#)]
pub struct ApplicationSpec {
    /// 应用名称，同时是应用命名空间的名称
    pub name: String,

    /// 应用所有者
    #[serde(default)]
    pub owner: String,

    /// 承载应用命名空间的逻辑集群
    pub cluster: String,

    /// 组件引用列表
    #[serde(default)]
    pub components: Vec<ComponentRef>,
}

/// 组件规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(group = "charity-project.eu", version = "v1", kind = "Component", plural = "components", namespaced)]
#[kube(status = "ComponentStatus")]
#[kube(printcolumn = r#"{"name":"应用", "type":"string", "jsonPath":".spec.application"}"#)]
#[kube(printcolumn = r#"{"name":"集群", "type":"string", "jsonPath":".spec.cluster"}"#)]
#[kube(printcolumn = r#"{"name":"状态", "type":"string", "jsonPath":".status.phase"}"#)]
pub struct ComponentSpec {
    /// 组件名称，也是 Deployment/Service/ServiceMonitor 的名称
    pub name: String,

    /// 所属应用
    pub application: String,

    /// 容器镜像
    pub image: String,

    /// 组件放置的逻辑集群
    pub cluster: String,

    /// 环境变量
    #[serde(default)]
    pub env: Vec<EnvVar>,

    /// 暴露端口
    #[serde(default)]
    pub expose: Vec<ExposePort>,
}

/// 协调阶段
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum Phase {
    /// 协调中
    #[default]
    Pending,
    /// 已就绪
    Ready,
    /// 协调失败
    Failed,
}

/// 应用状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    /// 阶段
    pub phase: Phase,

    /// 状态消息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// 上次更新时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    /// 已与应用集群建立对等连接的集群
    #[serde(default)]
    pub peered_clusters: Vec<String>,
}

/// 组件状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// 阶段
    pub phase: Phase,

    /// 状态消息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// 上次更新时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    /// 组件子资源实际所在的集群
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_cluster: Option<String>,
}

impl ComponentSpec {
    /// 除 expose 以外的字段是否发生变化
    pub fn differs_outside_expose(&self, other: &ComponentSpec) -> bool {
        self.name != other.name
            || self.application != other.application
            || self.image != other.image
            || self.cluster != other.cluster
            || self.env != other.env
    }
}

/// 按需创建的工作负载集群
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(group = "charity-project.eu", version = "v1", kind = "CustomCluster", plural = "customclusters", namespaced)]
#[kube(status = "CustomClusterStatus")]
#[kube(printcolumn = r#"{"name":"提供方", "type":"string", "jsonPath":".spec.infraProvider"}"#)]
#[kube(printcolumn = r#"{"name":"版本", "type":"string", "jsonPath":".spec.kubernetesVersion"}"#)]
#[kube(printcolumn = r#"{"name":"阶段", "type":"string", "jsonPath":".status.phase"}"#)]
#[serde(rename_all = "camelCase")]
pub struct CustomClusterSpec {
    /// 集群名称，同时是 ClusterAPI Cluster 的名称
    pub name: String,

    /// 基础设施提供方，例如 docker
    pub infra_provider: String,

    /// Kubernetes 版本，例如 v1.26.3
    pub kubernetes_version: String,

    /// 工作节点数
    pub worker_machine_count: u32,

    /// 控制平面节点数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_count: Option<u32>,

    /// 集群模板变体
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
}

/// CustomCluster 状态，字段取自 ClusterAPI Cluster 的状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomClusterStatus {
    /// ClusterAPI 阶段，例如 Provisioning、Provisioned；创建失败时为 Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// 基础设施是否就绪
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ready: Option<bool>,

    /// 控制平面是否就绪
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ready: Option<bool>,

    /// 状态消息，为空时序列化为 null 以清除之前的失败消息
    #[serde(default)]
    pub message: Option<String>,

    /// 上次更新时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CustomClusterSpec {
    /// 转换为集群生命周期使用的描述
    pub fn to_cluster_spec(&self) -> ClusterSpec {
        ClusterSpec {
            name: self.name.clone(),
            infra_provider: self.infra_provider.clone(),
            kubernetes_version: self.kubernetes_version.clone(),
            worker_machine_count: self.worker_machine_count,
            control_plane_count: self.control_plane_count,
            flavor: self.flavor.clone(),
        }
    }

    /// 节点数是否变化
    pub fn scale_differs(&self, other: &CustomClusterSpec) -> bool {
        self.worker_machine_count != other.worker_machine_count || self.control_plane_count != other.control_plane_count
    }
}

/// ClusterAPI Cluster 的只读视图，规范部分不被读取
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "cluster.x-k8s.io", version = "v1beta1", kind = "Cluster", plural = "clusters", namespaced)]
#[kube(struct = "ClusterApiCluster", status = "ClusterApiClusterStatus")]
pub struct ClusterApiClusterSpec {}

/// ClusterAPI Cluster 状态中被同步的字段
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterApiClusterStatus {
    /// 阶段
    #[serde(default)]
    pub phase: Option<String>,

    /// 基础设施是否就绪
    #[serde(default)]
    pub infrastructure_ready: Option<bool>,

    /// 控制平面是否就绪
    #[serde(default)]
    pub control_plane_ready: Option<bool>,
}

/// Application 的动态资源描述
pub fn application_resource() -> ApiResource {
    ApiResource::erase::<Application>(&())
}

/// Component 的动态资源描述
pub fn component_resource() -> ApiResource {
    ApiResource::erase::<Component>(&())
}

/// CustomCluster 的动态资源描述
pub fn custom_cluster_resource() -> ApiResource {
    ApiResource::erase::<CustomCluster>(&())
}
