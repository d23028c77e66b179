//! 对等编排器
//!
//! 在 [`ClusterLifecycle`] 之上实现 [`PeeringWorkflow`]。禁用时所有调用
//! 只记录日志并直接返回成功，便于在单集群环境中运行。

use async_trait::async_trait;
use charity_common::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

use super::{ClusterLifecycle, MigrationRequest, PeeringLink, PeeringWorkflow};

/// 对等编排器
pub struct PeeringOrchestrator {
    lifecycle: Arc<dyn ClusterLifecycle>,
    enabled: bool,
}

impl PeeringOrchestrator {
    /// 创建新的对等编排器
    pub fn new(lifecycle: Arc<dyn ClusterLifecycle>, enabled: bool) -> Self {
        Self { lifecycle, enabled }
    }
}

#[async_trait]
impl PeeringWorkflow for PeeringOrchestrator {
    async fn establish(&self, link: &PeeringLink) -> Result<()> {
        if !self.enabled {
            info!("对等连接已禁用，跳过建立: {}", link);
            return Ok(());
        }
        if link.local == link.remote {
            return Ok(());
        }

        info!("建立对等连接: {}", link);
        self.lifecycle.peer(&link.local, &link.remote).await?;
        self.lifecycle
            .offload_namespace(&link.namespace, &link.local, &link.remote)
            .await?;
        Ok(())
    }

    async fn release(&self, link: &PeeringLink, unpeer: bool) -> Result<()> {
        if !self.enabled {
            info!("对等连接已禁用，跳过释放: {}", link);
            return Ok(());
        }
        if link.local == link.remote {
            return Ok(());
        }

        info!(unpeer, "释放对等连接: {}", link);
        self.lifecycle
            .unoffload_namespace(&link.namespace, &link.local)
            .await?;
        if unpeer {
            self.lifecycle.unpeer(&link.local, &link.remote).await?;
        }
        Ok(())
    }

    async fn migrate(&self, request: &MigrationRequest) -> Result<()> {
        warn!(
            application = %request.application,
            "组件 {} 从 {} 迁移到 {} 尚未支持",
            request.component, request.old_cluster, request.new_cluster
        );
        Err(Error::MigrationUnsupported(format!(
            "{}/{}: {} -> {}",
            request.application, request.component, request.old_cluster, request.new_cluster
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peering::MockClusterLifecycle;
    use mockall::predicate::eq;
    use mockall::Sequence;

    #[test_log::test(tokio::test)]
    async fn test_establish_peers_then_offloads() {
        let mut lifecycle = MockClusterLifecycle::new();
        let mut seq = Sequence::new();
        lifecycle
            .expect_peer()
            .with(eq("c1"), eq("c2"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        lifecycle
            .expect_offload_namespace()
            .with(eq("shop"), eq("c1"), eq("c2"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        let orchestrator = PeeringOrchestrator::new(Arc::new(lifecycle), true);
        orchestrator
            .establish(&PeeringLink::new("shop", "c1", "c2"))
            .await
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_release_without_unpeer() {
        let mut lifecycle = MockClusterLifecycle::new();
        lifecycle
            .expect_unoffload_namespace()
            .with(eq("shop"), eq("c1"))
            .times(1)
            .returning(|_, _| Ok(()));
        lifecycle.expect_unpeer().times(0);

        let orchestrator = PeeringOrchestrator::new(Arc::new(lifecycle), true);
        orchestrator
            .release(&PeeringLink::new("shop", "c1", "c2"), false)
            .await
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_release_with_unpeer() {
        let mut lifecycle = MockClusterLifecycle::new();
        lifecycle
            .expect_unoffload_namespace()
            .returning(|_, _| Ok(()));
        lifecycle
            .expect_unpeer()
            .with(eq("c1"), eq("c2"))
            .times(1)
            .returning(|_, _| Ok(()));

        let orchestrator = PeeringOrchestrator::new(Arc::new(lifecycle), true);
        orchestrator
            .release(&PeeringLink::new("shop", "c1", "c2"), true)
            .await
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_disabled_skips_lifecycle() {
        let lifecycle = MockClusterLifecycle::new();
        let orchestrator = PeeringOrchestrator::new(Arc::new(lifecycle), false);
        let link = PeeringLink::new("shop", "c1", "c2");
        orchestrator.establish(&link).await.unwrap();
        orchestrator.release(&link, true).await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_peering_failure_stops_offload() {
        let mut lifecycle = MockClusterLifecycle::new();
        lifecycle
            .expect_peer()
            .returning(|_, _| Err(Error::Peering("agent not ready".into())));
        lifecycle.expect_offload_namespace().times(0);

        let orchestrator = PeeringOrchestrator::new(Arc::new(lifecycle), true);
        let err = orchestrator
            .establish(&PeeringLink::new("shop", "c1", "c2"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Peering(_)));
    }

    #[test_log::test(tokio::test)]
    async fn test_migrate_is_unsupported() {
        let orchestrator = PeeringOrchestrator::new(Arc::new(MockClusterLifecycle::new()), true);
        let err = orchestrator
            .migrate(&MigrationRequest {
                application: "shop".into(),
                component: "web".into(),
                old_cluster: "c1".into(),
                new_cluster: "c2".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MigrationUnsupported(_)));
    }
}
