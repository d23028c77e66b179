//! CustomCluster 状态机
//!
//! 创建与删除交给集群生命周期执行，更新只采用新的节点数。
//! 集群阶段与就绪状态由同名 ClusterAPI Cluster 的状态事件回写。

use charity_common::Result;
use tracing::{info, warn};

use super::Reconciler;
use crate::crd::CustomCluster;

impl Reconciler {
    /// 创建集群并等待就绪
    pub(super) async fn create_cluster(&self, cluster: &CustomCluster) -> Result<()> {
        let spec = cluster.spec.to_cluster_spec();
        info!(cluster = %spec.name, provider = %spec.infra_provider, version = %spec.kubernetes_version, "开始创建集群");
        self.lifecycle.provision(&spec).await?;
        info!(cluster = %spec.name, "集群已创建");
        Ok(())
    }

    /// 按新的节点数重新应用集群清单
    pub(super) async fn update_cluster(&self, old: &CustomCluster, new: &CustomCluster) -> Result<()> {
        let name = &new.spec.name;
        if !old.spec.scale_differs(&new.spec) {
            warn!(cluster = %name, "只支持修改节点数，忽略本次变化");
            return Ok(());
        }

        let mut spec = old.spec.to_cluster_spec();
        spec.worker_machine_count = new.spec.worker_machine_count;
        spec.control_plane_count = new.spec.control_plane_count;
        if spec != new.spec.to_cluster_spec() {
            warn!(cluster = %name, "节点数以外的字段变化被忽略");
        }

        self.lifecycle.provision(&spec).await?;
        info!(
            cluster = %name,
            workers = spec.worker_machine_count,
            control_planes = ?spec.control_plane_count,
            "集群节点数已更新"
        );
        Ok(())
    }

    /// 销毁集群
    pub(super) async fn delete_cluster(&self, cluster: &CustomCluster) -> Result<()> {
        self.lifecycle.deprovision(&cluster.spec.name).await?;
        info!(cluster = %cluster.spec.name, "集群已删除");
        Ok(())
    }
}
