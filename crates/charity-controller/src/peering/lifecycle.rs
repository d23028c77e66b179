//! 集群生命周期
//!
//! 通过外部命令驱动集群的创建、销毁与对等：
//! - `clusterctl` 生成集群清单，`kubectl` 应用清单并等待集群就绪
//! - `liqoctl` 建立/断开对等连接，卸载/撤销卸载命名空间
//!
//! 每次调用都受 `timeout` 约束。

use async_trait::async_trait;
use charity_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::cluster::ContextResolver;

/// 待创建集群的描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// 集群名称
    pub name: String,
    /// 基础设施提供方，例如 docker
    pub infra_provider: String,
    /// Kubernetes 版本
    pub kubernetes_version: String,
    /// 工作节点数
    pub worker_machine_count: u32,
    /// 控制平面节点数
    #[serde(default)]
    pub control_plane_count: Option<u32>,
    /// 集群模板变体
    #[serde(default)]
    pub flavor: Option<String>,
}

/// 集群生命周期与对等操作
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ClusterLifecycle: Send + Sync {
    /// 创建集群并等待就绪
    async fn provision(&self, spec: &ClusterSpec) -> Result<()>;

    /// 销毁集群
    async fn deprovision(&self, cluster: &str) -> Result<()>;

    /// 建立两个集群之间的对等连接
    async fn peer(&self, local: &str, remote: &str) -> Result<()>;

    /// 断开两个集群之间的对等连接
    async fn unpeer(&self, local: &str, remote: &str) -> Result<()>;

    /// 把本地集群的命名空间卸载到远端集群
    async fn offload_namespace(&self, namespace: &str, local: &str, remote: &str) -> Result<()>;

    /// 撤销命名空间卸载
    async fn unoffload_namespace(&self, namespace: &str, local: &str) -> Result<()>;
}

/// 外部命令配置
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// liqoctl 路径
    pub liqoctl: String,
    /// clusterctl 路径
    pub clusterctl: String,
    /// kubectl 路径
    pub kubectl: String,
    /// 单次命令（含就绪等待）的超时
    pub timeout: Duration,
    /// 传给外部命令的 kubeconfig
    pub kubeconfig: Option<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            liqoctl: "liqoctl".to_string(),
            clusterctl: "clusterctl".to_string(),
            kubectl: "kubectl".to_string(),
            timeout: Duration::from_secs(180),
            kubeconfig: None,
        }
    }
}

/// 基于外部命令的集群生命周期实现
pub struct CommandLifecycle {
    config: CommandConfig,
    resolver: Arc<dyn ContextResolver>,
}

impl CommandLifecycle {
    /// 创建新的命令生命周期管理器
    pub fn new(config: CommandConfig, resolver: Arc<dyn ContextResolver>) -> Self {
        Self { config, resolver }
    }

    fn context_of(&self, cluster: &str) -> Result<Option<String>> {
        Ok(self.resolver.resolve(cluster)?.context)
    }

    fn with_kubeconfig(&self, mut args: Vec<String>) -> Vec<String> {
        if let Some(path) = &self.config.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(path.clone());
        }
        args
    }

    async fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<String> {
        debug!(command = %program, args = ?args, "执行外部命令");

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Command(format!("无法执行 {}: {}", program, e)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
        }

        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::Command(format!(
                    "{} 在 {} 内未完成",
                    program,
                    timeout_arg(self.config.timeout)
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Command(format!(
                "{} {} 失败: {}",
                program,
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn context_flag(args: &mut Vec<String>, flag: &str, context: Option<String>) {
    if let Some(context) = context {
        args.push(flag.to_string());
        args.push(context);
    }
}

/// kubectl/clusterctl 接受的超时写法，例如 `180s`
fn timeout_arg(timeout: Duration) -> String {
    format!("{}s", timeout.as_secs())
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub(crate) fn generate_cluster_args(spec: &ClusterSpec) -> Vec<String> {
    let mut args = strings(&["generate", "cluster", &spec.name]);
    args.extend(strings(&[
        "--infrastructure",
        &spec.infra_provider,
        "--kubernetes-version",
        &spec.kubernetes_version,
        "--worker-machine-count",
        &spec.worker_machine_count.to_string(),
    ]));
    if let Some(count) = spec.control_plane_count {
        args.extend(strings(&["--control-plane-machine-count", &count.to_string()]));
    }
    if let Some(flavor) = &spec.flavor {
        args.extend(strings(&["--flavor", flavor]));
    }
    args
}

pub(crate) fn wait_cluster_args(cluster: &str, timeout: Duration) -> Vec<String> {
    strings(&[
        "wait",
        "--for=condition=Ready",
        &format!("cluster/{}", cluster),
        "--timeout",
        &timeout_arg(timeout),
    ])
}

pub(crate) fn delete_cluster_args(cluster: &str, timeout: Duration) -> Vec<String> {
    strings(&[
        "delete",
        "cluster",
        cluster,
        "--wait",
        "--timeout",
        &timeout_arg(timeout),
    ])
}

pub(crate) fn peer_args(local: Option<String>, remote: Option<String>) -> Vec<String> {
    let mut args = strings(&["peer"]);
    context_flag(&mut args, "--context", local);
    context_flag(&mut args, "--remote-context", remote);
    args
}

pub(crate) fn unpeer_args(local: Option<String>, remote: Option<String>) -> Vec<String> {
    let mut args = strings(&["unpeer", "--skip-confirm"]);
    context_flag(&mut args, "--context", local);
    context_flag(&mut args, "--remote-context", remote);
    args
}

pub(crate) fn offload_args(namespace: &str, local: Option<String>, remote: &str) -> Vec<String> {
    let mut args = strings(&[
        "offload",
        "namespace",
        namespace,
        "--namespace-mapping-strategy",
        "EnforceSameName",
        "--pod-offloading-strategy",
        "LocalAndRemote",
        "--selector",
        &format!("liqo.io/remote-cluster-id={}", remote),
    ]);
    context_flag(&mut args, "--context", local);
    args
}

pub(crate) fn unoffload_args(namespace: &str, local: Option<String>) -> Vec<String> {
    let mut args = strings(&["unoffload", "namespace", namespace, "--skip-confirm"]);
    context_flag(&mut args, "--context", local);
    args
}

#[async_trait]
impl ClusterLifecycle for CommandLifecycle {
    async fn provision(&self, spec: &ClusterSpec) -> Result<()> {
        info!("开始创建集群: {}", spec.name);

        let manifest = self
            .run(&self.config.clusterctl, &self.with_kubeconfig(generate_cluster_args(spec)), None)
            .await?;
        let apply = self.with_kubeconfig(strings(&["apply", "-f", "-"]));
        self.run(&self.config.kubectl, &apply, Some(&manifest)).await?;

        let wait = self.with_kubeconfig(wait_cluster_args(&spec.name, self.config.timeout));
        self.run(&self.config.kubectl, &wait, None).await?;

        info!("集群 {} 已就绪", spec.name);
        Ok(())
    }

    async fn deprovision(&self, cluster: &str) -> Result<()> {
        info!("开始销毁集群: {}", cluster);
        let args = self.with_kubeconfig(delete_cluster_args(cluster, self.config.timeout));
        self.run(&self.config.kubectl, &args, None).await?;
        info!("集群 {} 已销毁", cluster);
        Ok(())
    }

    async fn peer(&self, local: &str, remote: &str) -> Result<()> {
        let args = self.with_kubeconfig(peer_args(self.context_of(local)?, self.context_of(remote)?));
        self.run(&self.config.liqoctl, &args, None)
            .await
            .map_err(|e| Error::Peering(format!("{} 与 {} 对等失败: {}", local, remote, e)))?;
        info!("集群 {} 与 {} 已建立对等连接", local, remote);
        Ok(())
    }

    async fn unpeer(&self, local: &str, remote: &str) -> Result<()> {
        let args = self.with_kubeconfig(unpeer_args(self.context_of(local)?, self.context_of(remote)?));
        self.run(&self.config.liqoctl, &args, None)
            .await
            .map_err(|e| Error::Peering(format!("{} 与 {} 断开对等失败: {}", local, remote, e)))?;
        info!("集群 {} 与 {} 已断开对等连接", local, remote);
        Ok(())
    }

    async fn offload_namespace(&self, namespace: &str, local: &str, remote: &str) -> Result<()> {
        let args = self.with_kubeconfig(offload_args(namespace, self.context_of(local)?, remote));
        self.run(&self.config.liqoctl, &args, None)
            .await
            .map_err(|e| Error::Peering(format!("卸载命名空间 {} 失败: {}", namespace, e)))?;
        info!("命名空间 {} 已从 {} 卸载到 {}", namespace, local, remote);
        Ok(())
    }

    async fn unoffload_namespace(&self, namespace: &str, local: &str) -> Result<()> {
        let args = self.with_kubeconfig(unoffload_args(namespace, self.context_of(local)?));
        self.run(&self.config.liqoctl, &args, None)
            .await
            .map_err(|e| Error::Peering(format!("撤销命名空间 {} 卸载失败: {}", namespace, e)))?;
        info!("命名空间 {} 已撤销卸载", namespace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterContext, MockContextResolver};

    fn spec() -> ClusterSpec {
        ClusterSpec {
            name: "c2".into(),
            infra_provider: "docker".into(),
            kubernetes_version: "v1.26.3".into(),
            worker_machine_count: 2,
            control_plane_count: None,
            flavor: Some("development".into()),
        }
    }

    #[test]
    fn test_generate_cluster_args() {
        let args = generate_cluster_args(&spec());
        assert_eq!(
            args,
            strings(&[
                "generate",
                "cluster",
                "c2",
                "--infrastructure",
                "docker",
                "--kubernetes-version",
                "v1.26.3",
                "--worker-machine-count",
                "2",
                "--flavor",
                "development",
            ])
        );
    }

    #[test]
    fn test_cluster_spec_serde() {
        let spec: ClusterSpec = serde_json::from_value(serde_json::json!({
            "name": "c3",
            "infraProvider": "docker",
            "kubernetesVersion": "v1.27.0",
            "workerMachineCount": 1,
            "controlPlaneCount": 3
        }))
        .unwrap();
        assert_eq!(spec.control_plane_count, Some(3));
        assert!(spec.flavor.is_none());
    }

    #[test]
    fn test_wait_uses_timeout_seconds() {
        let args = wait_cluster_args("c2", Duration::from_secs(180));
        assert!(args.contains(&"cluster/c2".to_string()));
        assert_eq!(args.last().unwrap(), "180s");
    }

    #[test]
    fn test_timeout_arg_rounds_down_to_seconds() {
        assert_eq!(timeout_arg(Duration::from_millis(1500)), "1s");
        assert_eq!(timeout_arg(Duration::from_secs(3600)), "3600s");
        let args = delete_cluster_args("c2", Duration::from_secs(90));
        assert_eq!(&args[args.len() - 2..], &strings(&["--timeout", "90s"])[..]);
    }

    #[tokio::test]
    async fn test_timeout_error_names_the_limit() {
        let resolver = MockContextResolver::new();
        let config = CommandConfig {
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let lifecycle = CommandLifecycle::new(config, Arc::new(resolver));
        let err = lifecycle
            .run("sleep", &strings(&["5"]), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sleep 在 0s 内未完成"), "{}", err);
    }

    #[test]
    fn test_peer_args_skip_missing_context() {
        assert_eq!(
            peer_args(Some("ctx-1".into()), Some("ctx-2".into())),
            strings(&["peer", "--context", "ctx-1", "--remote-context", "ctx-2"])
        );
        assert_eq!(
            unpeer_args(None, Some("ctx-2".into())),
            strings(&["unpeer", "--skip-confirm", "--remote-context", "ctx-2"])
        );
    }

    #[test]
    fn test_offload_args() {
        let args = offload_args("shop", Some("ctx-1".into()), "c2");
        assert_eq!(&args[..3], &strings(&["offload", "namespace", "shop"])[..]);
        assert!(args.contains(&"liqo.io/remote-cluster-id=c2".to_string()));
        assert_eq!(&args[args.len() - 2..], &strings(&["--context", "ctx-1"])[..]);
        assert_eq!(
            unoffload_args("shop", None),
            strings(&["unoffload", "namespace", "shop", "--skip-confirm"])
        );
    }

    #[tokio::test]
    async fn test_peer_fails_for_unknown_cluster() {
        let mut resolver = MockContextResolver::new();
        resolver
            .expect_resolve()
            .returning(|name| match name {
                "c1" => Ok(ClusterContext::new("c1", "ctx-1")),
                other => Err(Error::ClusterNotFound(other.to_string())),
            });

        let lifecycle = CommandLifecycle::new(CommandConfig::default(), Arc::new(resolver));
        let err = lifecycle.peer("c1", "c9").await.unwrap_err();
        assert!(matches!(err, Error::ClusterNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_command_error() {
        let resolver = MockContextResolver::new();
        let config = CommandConfig {
            kubectl: "/nonexistent/kubectl".into(),
            ..Default::default()
        };
        let lifecycle = CommandLifecycle::new(config, Arc::new(resolver));
        let err = lifecycle.deprovision("c2").await.unwrap_err();
        assert!(matches!(err, Error::Command(_)));
    }
}
