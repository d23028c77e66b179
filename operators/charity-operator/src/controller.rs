//! 控制器模块
//!
//! 该模块负责组装 Operator 的各个协作者：集群上下文解析器、集群 API 客户端、
//! 集群生命周期、对等编排器、清单模板与协调器，并管理事件处理器与准入 Webhook 的生命周期。

use anyhow::{Context, Result};
use charity_controller::peering::CommandConfig;
use charity_controller::{
    ClusterLifecycle, CommandLifecycle, ContextResolver, KubeClusterApi, KubeconfigResolver, PeeringOrchestrator,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::OperatorConfig;
use crate::event_handler::EventHandler;
use crate::reconcile::Reconciler;
use crate::resources::DefaultManifestRenderer;
use crate::webhook::{run_webhook_server, ValidationContext};

/// 控制器结构体
pub struct Controller {
    /// Operator 配置
    config: Arc<OperatorConfig>,
    /// 集群上下文解析器
    resolver: Arc<dyn ContextResolver>,
    /// 集群 API 客户端
    api: Arc<KubeClusterApi>,
    /// 协调器
    reconciler: Arc<Reconciler>,
    /// 事件处理器
    event_handler: Option<EventHandler>,
    /// Webhook 服务任务
    webhook: Option<JoinHandle<()>>,
    /// 控制器是否正在运行
    running: Arc<RwLock<bool>>,
}

impl Controller {
    /// 创建新的控制器
    pub fn new(config: Arc<OperatorConfig>) -> Result<Self> {
        let resolver: Arc<dyn ContextResolver> = Arc::new(
            KubeconfigResolver::load(config.kubeconfig.as_deref(), config.management_cluster.clone())
                .context("加载集群上下文失败")?,
        );
        let api = Arc::new(KubeClusterApi::new(config.kubeconfig.clone()));

        let lifecycle: Arc<dyn ClusterLifecycle> = Arc::new(CommandLifecycle::new(
            CommandConfig {
                liqoctl: config.peering.liqoctl.clone(),
                clusterctl: config.peering.clusterctl.clone(),
                kubectl: config.peering.kubectl.clone(),
                timeout: config.peering.ready_timeout(),
                kubeconfig: config.kubeconfig.clone(),
            },
            resolver.clone(),
        ));
        let peering = Arc::new(PeeringOrchestrator::new(lifecycle.clone(), config.peering.enabled));

        let reconciler = Arc::new(Reconciler::new(
            config.clone(),
            resolver.clone(),
            api.clone(),
            Arc::new(DefaultManifestRenderer),
            peering,
            lifecycle,
        ));

        Ok(Self {
            config,
            resolver,
            api,
            reconciler,
            event_handler: None,
            webhook: None,
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// 启动控制器
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let management = self.resolver.management().context("解析管理集群失败")?;
        let client = self
            .api
            .client(&management)
            .await
            .with_context(|| format!("连接管理集群 {} 失败", management))?;

        let event_handler = EventHandler::new(client, self.config.clone(), self.reconciler.clone());
        event_handler.start().await?;
        self.event_handler = Some(event_handler);

        if self.config.webhook.enabled {
            self.start_webhook();
        }

        info!(management = %management, clusters = ?self.resolver.clusters(), "CHARITY Operator 控制器已启动");
        Ok(())
    }

    /// 停止控制器
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if !*running {
                return Ok(());
            }
            *running = false;
        }

        if let Some(event_handler) = self.event_handler.take() {
            if event_handler.is_running().await {
                event_handler.stop().await?;
            }
        }
        if let Some(webhook) = self.webhook.take() {
            webhook.abort();
        }

        info!("CHARITY Operator 控制器已停止");
        Ok(())
    }

    /// 是否正在运行
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    fn start_webhook(&mut self) {
        let ctx = Arc::new(ValidationContext::new(self.config.clone(), self.resolver.clone()));
        let webhook = self.config.webhook.clone();

        self.webhook = Some(tokio::spawn(async move {
            if let Err(e) = run_webhook_server(ctx, &webhook).await {
                error!("Webhook 服务错误: {:#}", e);
            }
        }));
    }
}

/// 创建默认的控制器
pub fn create_default_controller(config: OperatorConfig) -> Result<Controller> {
    Controller::new(Arc::new(config))
}
