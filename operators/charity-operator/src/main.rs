//! CHARITY Operator 入口

use anyhow::{Context, Result};
use charity_operator::config::OperatorConfig;
use charity_operator::crd::{Application, Component, CustomCluster};
use charity_operator::CharityOperator;
use clap::Parser;
use kube::CustomResourceExt;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "charity-operator", version, about = "CHARITY 多集群应用编排 Operator")]
struct Args {
    /// 配置文件路径（YAML 或 JSON）
    #[arg(short, long, env = "CHARITY_CONFIG")]
    config: Option<String>,

    /// kubeconfig 路径
    #[arg(long)]
    kubeconfig: Option<String>,

    /// 管理集群的逻辑名
    #[arg(long)]
    management_cluster: Option<String>,

    /// 日志级别
    #[arg(long)]
    log_level: Option<String>,

    /// 输出 CRD 定义后退出
    #[arg(long)]
    print_crds: bool,
}

impl Args {
    /// 命令行参数覆盖配置文件
    fn apply(&self, config: &mut OperatorConfig) {
        if let Some(kubeconfig) = &self.kubeconfig {
            config.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(cluster) = &self.management_cluster {
            config.management_cluster = cluster.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

fn print_crds() -> Result<()> {
    let application = serde_yaml::to_string(&Application::crd()).context("序列化 Application CRD 失败")?;
    let component = serde_yaml::to_string(&Component::crd()).context("序列化 Component CRD 失败")?;
    let cluster = serde_yaml::to_string(&CustomCluster::crd()).context("序列化 CustomCluster CRD 失败")?;
    println!("{}---\n{}---\n{}", application, component, cluster);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.print_crds {
        return print_crds();
    }

    let mut config = OperatorConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        management = %config.management_cluster,
        namespace = %config.management_namespace,
        peering = config.peering.enabled,
        webhook = config.webhook.enabled,
        provisioning = config.provisioning.enabled,
        "启动 CHARITY Operator"
    );

    let operator = CharityOperator::new(config)?;
    operator.start().await?;

    signal::ctrl_c().await.context("等待退出信号失败")?;
    info!("收到退出信号");
    if operator.is_running().await {
        operator.stop().await?;
    }

    Ok(())
}
