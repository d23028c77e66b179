//! Application 状态机

use charity_common::{diff_components, distinct_clusters, ComponentRef, Error, Result};
use charity_controller::{MigrationRequest, PeeringLink};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::Reconciler;
use crate::crd::{application_resource, component_resource, Application, Component};
use crate::resources::{from_dynamic, remove_object};

/// 组件集群中与应用集群不同的集群
fn remote_clusters(cluster: &str, components: &[ComponentRef]) -> BTreeSet<String> {
    let mut clusters = distinct_clusters(components);
    clusters.remove(cluster);
    clusters
}

/// 应用是否仍有组件跨越这对集群
fn spans_pair(app: &Application, local: &str, remote: &str) -> bool {
    let spans = |from: &str, to: &str| app.spec.cluster == from && app.spec.components.iter().any(|c| c.cluster == to);
    spans(local, remote) || spans(remote, local)
}

impl Reconciler {
    /// 创建应用：命名空间、镜像命名空间与跨集群对等
    pub(super) async fn create_application(&self, app: &Application) -> Result<()> {
        let name = &app.spec.name;
        let ctx = self.resolver.resolve(&app.spec.cluster)?;

        self.namespaces.ensure(name, &ctx).await?;
        self.mirror_namespace(name, &ctx.cluster).await?;

        let remotes = remote_clusters(&app.spec.cluster, &app.spec.components);
        for remote in &remotes {
            self.peering
                .establish(&PeeringLink::new(name.as_str(), app.spec.cluster.as_str(), remote.as_str()))
                .await?;
        }

        info!(application = %name, cluster = %ctx.cluster, remotes = remotes.len(), "应用已创建");
        self.application_ready(name, remotes.into_iter().collect()).await;
        Ok(())
    }

    /// 按组件列表差异更新应用
    pub(super) async fn update_components(&self, old: &Application, new: &Application) -> Result<()> {
        let name = &new.spec.name;
        let local = &new.spec.cluster;
        let diff = diff_components(Some(old.spec.components.as_slice()), Some(new.spec.components.as_slice()));
        if diff.is_empty() {
            debug!(application = %name, "组件列表没有变化");
            return Ok(());
        }

        // 迁移的目标集群按新增处理，源集群按移除处理
        let mut peered = remote_clusters(local, &old.spec.components);
        let targets = diff
            .added
            .iter()
            .map(|c| &c.cluster)
            .chain(diff.migrated.iter().map(|m| &m.new_cluster));
        for target in targets {
            if target == local || peered.contains(target) {
                continue;
            }
            self.peering
                .establish(&PeeringLink::new(name.as_str(), local.as_str(), target.as_str()))
                .await?;
            peered.insert(target.clone());
        }

        for removed in &diff.removed {
            self.remove_component_cr(name, &removed.name, Some(new)).await?;
        }

        // 未能迁移的组件仍运行在源集群上
        let mut still_needed = remote_clusters(local, &new.spec.components);
        for migrated in &diff.migrated {
            let request = MigrationRequest {
                application: name.clone(),
                component: migrated.name.clone(),
                old_cluster: migrated.old_cluster.clone(),
                new_cluster: migrated.new_cluster.clone(),
            };
            match self.peering.migrate(&request).await {
                Ok(()) => {}
                Err(Error::MigrationUnsupported(detail)) => {
                    warn!(application = %name, "组件迁移尚未支持，保持原有放置: {}", detail);
                    if migrated.old_cluster != *local {
                        still_needed.insert(migrated.old_cluster.clone());
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let released: BTreeSet<&String> = diff
            .removed
            .iter()
            .map(|c| &c.cluster)
            .chain(diff.migrated.iter().map(|m| &m.old_cluster))
            .filter(|c| *c != local && !still_needed.contains(*c))
            .collect();
        for remote in released {
            self.release_pair(new, remote).await?;
        }

        info!(
            application = %name,
            added = diff.added.len(),
            removed = diff.removed.len(),
            migrated = diff.migrated.len(),
            "应用组件列表已更新"
        );
        self.application_ready(name, still_needed.into_iter().collect()).await;
        Ok(())
    }

    /// 删除应用：级联删除组件、释放对等连接、删除命名空间
    pub(super) async fn delete_application(&self, app: &Application) -> Result<()> {
        let name = app.spec.name.as_str();
        let mgmt = self.management()?;

        let components = self.api.list(&mgmt, &component_resource(), Some(name)).await?;
        for object in &components {
            let component: Component = from_dynamic(object)?;
            self.teardown_component(&component, Some(app)).await?;
            if let Some(cr_name) = object.metadata.name.as_deref() {
                remove_object(self.api.as_ref(), &mgmt, &component_resource(), Some(name), cr_name).await?;
            }
        }

        for remote in remote_clusters(&app.spec.cluster, &app.spec.components) {
            self.release_pair(app, &remote).await?;
        }

        let ctx = self.resolver.resolve(&app.spec.cluster)?;
        self.namespaces.remove(name, &ctx).await?;
        if self.config.mirror_namespace && mgmt.cluster != ctx.cluster {
            self.namespaces.remove(name, &mgmt).await?;
        }

        info!(application = %name, components = components.len(), "应用已删除");
        Ok(())
    }

    /// 在管理集群中镜像应用命名空间
    async fn mirror_namespace(&self, name: &str, app_cluster: &str) -> Result<()> {
        if !self.config.mirror_namespace {
            return Ok(());
        }
        let mgmt = self.management()?;
        if mgmt.cluster == app_cluster {
            return Ok(());
        }
        self.namespaces.ensure(name, &mgmt).await
    }

    /// 删除组件 CR，并同步执行其删除路径
    async fn remove_component_cr(&self, application: &str, component: &str, app: Option<&Application>) -> Result<()> {
        let mgmt = self.management()?;
        let resource = component_resource();

        if let Some(object) = self.api.get(&mgmt, &resource, Some(application), component).await? {
            let component: Component = from_dynamic(&object)?;
            self.teardown_component(&component, app).await?;
        }
        remove_object(self.api.as_ref(), &mgmt, &resource, Some(application), component).await
    }

    /// 释放应用集群与远端集群之间的对等连接
    ///
    /// 只有当管理集群中没有其他应用仍跨越这对集群时才断开对等。
    async fn release_pair(&self, app: &Application, remote: &str) -> Result<()> {
        let local = &app.spec.cluster;
        let in_use = self.pair_in_use(&app.spec.name, local, remote).await?;
        if in_use {
            debug!(application = %app.spec.name, "集群对 {} <-> {} 仍被其他应用使用", local, remote);
        }
        self.peering
            .release(&PeeringLink::new(app.spec.name.as_str(), local.as_str(), remote), !in_use)
            .await
    }

    async fn pair_in_use(&self, exclude: &str, local: &str, remote: &str) -> Result<bool> {
        let mgmt = self.management()?;
        let objects = self
            .api
            .list(&mgmt, &application_resource(), Some(self.config.management_namespace.as_str()))
            .await?;

        for object in &objects {
            let app: Application = match from_dynamic(object) {
                Ok(app) => app,
                Err(e) => {
                    warn!("跳过无法解析的应用对象: {}", e);
                    continue;
                }
            };
            if app.spec.name != exclude && spans_pair(&app, local, remote) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
