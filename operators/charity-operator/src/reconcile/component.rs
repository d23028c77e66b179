//! Component 状态机

use charity_common::{metrics_ports, peered_ports, public_port, Error, ExposePort, Result};
use charity_controller::ClusterContext;
use tracing::{debug, info};

use super::Reconciler;
use crate::crd::{application_resource, Application, Component};
use crate::resources::from_dynamic;
use crate::resources::templates::DeploymentParams;

/// 容器端口集合，决定 Deployment 是否需要随 expose 重新应用
fn container_ports(expose: &[ExposePort]) -> Vec<i32> {
    expose.iter().map(|p| p.container_port).collect()
}

impl Reconciler {
    /// 读取组件所属的应用
    async fn owning_application(&self, component: &Component) -> Result<Option<Application>> {
        let mgmt = self.management()?;
        let object = self
            .api
            .get(
                &mgmt,
                &application_resource(),
                Some(self.config.management_namespace.as_str()),
                &component.spec.application,
            )
            .await?;
        object.as_ref().map(from_dynamic::<Application>).transpose()
    }

    /// 解析组件子资源所在的集群上下文
    ///
    /// 组件子资源总是写入应用集群的应用命名空间；组件集群不同时由
    /// Deployment 的放置选择器把工作负载调度到对端集群。
    async fn target(&self, component: &Component) -> Result<(Application, ClusterContext)> {
        let app = self
            .owning_application(component)
            .await?
            .ok_or_else(|| Error::ApplicationNotReady(component.spec.application.clone()))?;
        let ctx = self.resolver.resolve(&app.spec.cluster)?;
        Ok((app, ctx))
    }

    fn deployment_params(&self, component: &Component, app: &Application) -> DeploymentParams {
        let spec = &component.spec;
        let placement = (spec.cluster != app.spec.cluster)
            .then(|| (self.config.placement_label.clone(), spec.cluster.clone()));

        DeploymentParams {
            name: spec.name.clone(),
            namespace: spec.application.clone(),
            image: spec.image.clone(),
            env: spec.env.clone(),
            expose: spec.expose.clone(),
            placement,
        }
    }

    /// 创建组件：Deployment，按需 Service、ServiceMonitor 与 Ingress 主机
    pub(super) async fn create_component(&self, component: &Component) -> Result<()> {
        let spec = &component.spec;
        let (app, ctx) = self.target(component).await?;

        if !app.spec.components.iter().any(|c| c.name == spec.name) {
            return Err(Error::NotRegistered {
                component: spec.name.clone(),
                application: app.spec.name.clone(),
            });
        }

        self.deployments
            .apply(&self.deployment_params(component, &app), &ctx, false)
            .await?;

        let peered = peered_ports(&spec.expose);
        if !peered.is_empty() {
            self.services
                .apply(&spec.application, &spec.name, &peered, &ctx, false)
                .await?;
        }

        let metrics = metrics_ports(&spec.expose);
        if !metrics.is_empty() {
            self.monitors
                .apply(&spec.application, &spec.name, &metrics, &ctx, false)
                .await?;
        }

        if let Some(port) = public_port(&spec.expose) {
            self.ingress
                .add_host(&spec.application, &spec.name, port.cluster_port, &ctx)
                .await?;
        }

        info!(application = %spec.application, component = %spec.name, cluster = %ctx.cluster, "组件已创建");
        self.component_ready(component, &ctx.cluster).await;
        Ok(())
    }

    /// expose 以外的字段变化：总是以替换方式重新应用 Deployment
    pub(super) async fn update_component_spec(&self, _old: &Component, new: &Component) -> Result<()> {
        let (app, ctx) = self.target(new).await?;
        self.deployments
            .apply(&self.deployment_params(new, &app), &ctx, true)
            .await?;

        info!(application = %new.spec.application, component = %new.spec.name, "组件 Deployment 已重新应用");
        self.component_ready(new, &ctx.cluster).await;
        Ok(())
    }

    /// expose 变化：分别同步 Service、ServiceMonitor 与 Ingress 主机
    ///
    /// 各自的端口投影没有变化时不发出任何写操作。
    pub(super) async fn update_component_expose(&self, old: &Component, new: &Component) -> Result<()> {
        let spec = &new.spec;
        let (app, ctx) = self.target(new).await?;

        if container_ports(&old.spec.expose) != container_ports(&spec.expose) {
            self.deployments
                .apply(&self.deployment_params(new, &app), &ctx, true)
                .await?;
        }

        let (old_peered, new_peered) = (peered_ports(&old.spec.expose), peered_ports(&spec.expose));
        if old_peered != new_peered {
            if !new_peered.is_empty() {
                self.services
                    .apply(&spec.application, &spec.name, &new_peered, &ctx, !old_peered.is_empty())
                    .await?;
            } else {
                self.services.remove(&spec.application, &spec.name, &ctx).await?;
            }
        }

        let (old_metrics, new_metrics) = (metrics_ports(&old.spec.expose), metrics_ports(&spec.expose));
        if old_metrics != new_metrics {
            if !new_metrics.is_empty() {
                self.monitors
                    .apply(&spec.application, &spec.name, &new_metrics, &ctx, !old_metrics.is_empty())
                    .await?;
            } else {
                self.monitors.remove(&spec.application, &spec.name, &ctx).await?;
            }
        }

        match (public_port(&old.spec.expose), public_port(&spec.expose)) {
            (None, Some(port)) => {
                self.ingress
                    .add_host(&spec.application, &spec.name, port.cluster_port, &ctx)
                    .await?
            }
            (Some(_), None) => self.ingress.remove_host(&spec.application, &spec.name, &ctx).await?,
            (Some(before), Some(after)) if before.cluster_port != after.cluster_port => {
                self.ingress
                    .update_host_port(&spec.application, &spec.name, after.cluster_port, &ctx)
                    .await?
            }
            _ => debug!(component = %spec.name, "公开端口没有变化"),
        }

        info!(application = %spec.application, component = %spec.name, "组件端口已同步");
        self.component_ready(new, &ctx.cluster).await;
        Ok(())
    }

    /// 删除组件
    pub(super) async fn delete_component(&self, component: &Component) -> Result<()> {
        let app = self.owning_application(component).await?;
        self.teardown_component(component, app.as_ref()).await
    }

    /// 卸载组件的全部子资源
    ///
    /// 应用已被删除时退回到状态中记录的目标集群，再退回到组件集群。
    /// 每种能力最多卸载一次。
    pub(super) async fn teardown_component(&self, component: &Component, app: Option<&Application>) -> Result<()> {
        let spec = &component.spec;
        let cluster = match app {
            Some(app) => app.spec.cluster.as_str(),
            None => component
                .status
                .as_ref()
                .and_then(|s| s.target_cluster.as_deref())
                .unwrap_or(spec.cluster.as_str()),
        };
        let ctx = self.resolver.resolve(cluster)?;

        self.deployments.remove(&spec.application, &spec.name, &ctx).await?;

        if spec.expose.iter().any(|p| p.is_peered) {
            self.services.remove(&spec.application, &spec.name, &ctx).await?;
        }
        if spec.expose.iter().any(|p| p.is_exposing_metrics) {
            self.monitors.remove(&spec.application, &spec.name, &ctx).await?;
        }
        if spec.expose.iter().any(|p| p.is_public) {
            self.ingress.remove_host(&spec.application, &spec.name, &ctx).await?;
        }

        info!(application = %spec.application, component = %spec.name, cluster = %ctx.cluster, "组件已删除");
        Ok(())
    }
}
