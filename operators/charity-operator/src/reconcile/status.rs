//! 状态回写
//!
//! 状态回写是尽力而为的：失败只记录日志，不影响当前转换的结果。

use charity_common::Error;
use chrono::Utc;
use kube::api::ApiResource;
use serde::Serialize;
use tracing::{debug, warn};

use super::{ApplicationEvent, ClusterEvent, ComponentEvent, CrEvent, Reconciler};
use crate::crd::{
    application_resource, component_resource, custom_cluster_resource, ApplicationStatus, ClusterApiClusterStatus,
    Component, ComponentStatus, CustomCluster, CustomClusterStatus, Phase,
};

impl Reconciler {
    async fn patch_status<S: Serialize>(&self, resource: &ApiResource, namespace: &str, name: &str, status: &S) {
        let value = match serde_json::to_value(status) {
            Ok(value) => value,
            Err(e) => {
                warn!(name = %name, "无法序列化状态: {}", e);
                return;
            }
        };
        let mgmt = match self.management() {
            Ok(mgmt) => mgmt,
            Err(e) => {
                warn!(name = %name, "无法解析管理集群，跳过状态回写: {}", e);
                return;
            }
        };

        match self.api.patch_status(&mgmt, resource, Some(namespace), name, &value).await {
            Ok(()) => debug!(kind = %resource.kind, name = %name, "状态已更新"),
            Err(e) if e.is_not_found() => debug!(kind = %resource.kind, name = %name, "对象已不存在，跳过状态回写"),
            Err(e) => warn!(kind = %resource.kind, name = %name, "状态回写失败: {}", e),
        }
    }

    pub(super) async fn application_ready(&self, name: &str, peered_clusters: Vec<String>) {
        let status = ApplicationStatus {
            phase: Phase::Ready,
            message: None,
            last_updated: Some(Utc::now()),
            peered_clusters,
        };
        self.patch_status(&application_resource(), &self.config.management_namespace, name, &status)
            .await;
    }

    pub(super) async fn component_ready(&self, component: &Component, cluster: &str) {
        let status = ComponentStatus {
            phase: Phase::Ready,
            message: None,
            last_updated: Some(Utc::now()),
            target_cluster: Some(cluster.to_string()),
        };
        self.patch_component(component, &status).await;
    }

    /// 把 ClusterAPI Cluster 的状态写到同名 CustomCluster
    pub(super) async fn cluster_observed(&self, name: &str, observed: &ClusterApiClusterStatus) {
        let status = CustomClusterStatus {
            phase: observed.phase.clone(),
            infrastructure_ready: observed.infrastructure_ready,
            control_plane_ready: observed.control_plane_ready,
            message: None,
            last_updated: Some(Utc::now()),
        };
        self.patch_status(&custom_cluster_resource(), &self.config.management_namespace, name, &status)
            .await;
    }

    async fn patch_cluster(&self, cluster: &CustomCluster, status: &CustomClusterStatus) {
        let name = cluster.metadata.name.as_deref().unwrap_or(&cluster.spec.name);
        self.patch_status(&custom_cluster_resource(), &self.config.management_namespace, name, status)
            .await;
    }

    async fn patch_component(&self, component: &Component, status: &ComponentStatus) {
        let name = component.metadata.name.as_deref().unwrap_or(&component.spec.name);
        self.patch_status(&component_resource(), &component.spec.application, name, status)
            .await;
    }

    /// 记录转换失败
    ///
    /// 删除转换不回写状态。
    pub(super) async fn record_failure(&self, event: &CrEvent, error: &Error) {
        let message = Some(error.to_string());
        match event {
            CrEvent::Application(ApplicationEvent::Create(app))
            | CrEvent::Application(ApplicationEvent::UpdateComponents { new: app, .. }) => {
                let status = ApplicationStatus {
                    phase: Phase::Failed,
                    message,
                    last_updated: Some(Utc::now()),
                    peered_clusters: app.status.as_ref().map(|s| s.peered_clusters.clone()).unwrap_or_default(),
                };
                self.patch_status(&application_resource(), &self.config.management_namespace, &app.spec.name, &status)
                    .await;
            }
            CrEvent::Component(ComponentEvent::Create(component))
            | CrEvent::Component(ComponentEvent::UpdateSpec { new: component, .. })
            | CrEvent::Component(ComponentEvent::UpdateExpose { new: component, .. }) => {
                let status = ComponentStatus {
                    phase: Phase::Failed,
                    message,
                    last_updated: Some(Utc::now()),
                    target_cluster: component.status.as_ref().and_then(|s| s.target_cluster.clone()),
                };
                self.patch_component(component, &status).await;
            }
            CrEvent::Cluster(ClusterEvent::Create(cluster)) | CrEvent::Cluster(ClusterEvent::Update { new: cluster, .. }) => {
                let status = CustomClusterStatus {
                    phase: Some("Failed".to_string()),
                    message,
                    last_updated: Some(Utc::now()),
                    ..Default::default()
                };
                self.patch_cluster(cluster, &status).await;
            }
            CrEvent::Application(ApplicationEvent::Delete(_))
            | CrEvent::Component(ComponentEvent::Delete(_))
            | CrEvent::Cluster(ClusterEvent::Delete(_))
            | CrEvent::Cluster(ClusterEvent::Observed { .. }) => {}
        }
    }
}
