//! 配置管理模块
//!
//! 配置按以下顺序叠加：内置默认值、可选的 YAML/JSON 配置文件、
//! 以 `CHARITY__` 为前缀的环境变量（双下划线表示嵌套，
//! `CHARITY__FORBIDDEN_NAMES` 为逗号分隔列表），最后是命令行参数。

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Operator 配置结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// 管理集群的逻辑名
    pub management_cluster: String,
    /// Application 所在的管理命名空间
    pub management_namespace: String,
    /// 不允许用作应用名的命名空间
    pub forbidden_names: Vec<String>,
    /// 自定义 kubeconfig 路径
    pub kubeconfig: Option<String>,
    /// 日志级别
    pub log_level: String,
    /// Ingress 主机名后缀
    pub ingress_domain: String,
    /// Ingress 类名
    pub ingress_class: Option<String>,
    /// 跨集群放置使用的节点选择器键
    pub placement_label: String,
    /// 是否在管理集群中镜像应用命名空间
    ///
    /// Component 保存在管理集群中以应用命名的命名空间里，该命名空间由镜像
    /// 创建，因此不能关闭。
    pub mirror_namespace: bool,
    /// 重试配置
    pub retry: RetryConfig,
    /// 准入 Webhook 配置
    pub webhook: WebhookConfig,
    /// 对等连接配置
    pub peering: PeeringConfig,
    /// 集群创建配置
    pub provisioning: ProvisioningConfig,
}

/// 可重试失败的重新投递配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 两次尝试之间的等待（秒）
    pub backoff_seconds: u64,
}

/// 准入 Webhook 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// 是否启动 Webhook 服务
    pub enabled: bool,
    /// 监听端口
    pub port: u16,
    /// TLS 证书路径
    pub cert_path: String,
    /// TLS 私钥路径
    pub key_path: String,
}

/// 对等连接配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeeringConfig {
    /// 是否执行对等与卸载操作
    pub enabled: bool,
    /// liqoctl 路径
    pub liqoctl: String,
    /// clusterctl 路径
    pub clusterctl: String,
    /// kubectl 路径
    pub kubectl: String,
    /// 外部命令的就绪等待超时（秒）
    pub ready_timeout_seconds: u64,
}

/// CustomCluster 集群创建配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// 是否监听 CustomCluster 并同步 ClusterAPI 集群状态
    pub enabled: bool,
    /// 支持的基础设施提供方
    pub infra_providers: Vec<String>,
}

impl RetryConfig {
    /// 重试间隔
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_seconds)
    }
}

impl PeeringConfig {
    /// 外部命令超时
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_seconds)
    }
}

impl OperatorConfig {
    /// 加载配置：默认值、配置文件、进程环境变量
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// 加载配置，`env` 不为空时用它代替进程环境变量
    pub fn load_with_env(path: Option<&str>, env: Option<config::Map<String, String>>) -> Result<Self> {
        let defaults = Config::try_from(&create_default_config()).context("构建默认配置失败")?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            let format = match Path::new(path).extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => return Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON: {}", path)),
            };
            builder = builder.add_source(File::with_name(path).format(format));
        }

        let environment = Environment::with_prefix("CHARITY")
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("forbidden_names")
            .with_list_parse_key("provisioning.infra_providers")
            .try_parsing(true)
            .source(env);

        let config = builder
            .add_source(environment)
            .build()
            .context("构建配置失败")?
            .try_deserialize::<OperatorConfig>()
            .context("配置格式错误")?;

        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.management_cluster.is_empty() {
            return Err(anyhow!("management_cluster 不能为空"));
        }
        if self.ingress_domain.is_empty() {
            return Err(anyhow!("ingress_domain 不能为空"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts 至少为 1"));
        }
        if !self.mirror_namespace {
            return Err(anyhow!(
                "mirror_namespace 不能关闭：Component 保存在管理集群的应用命名空间中"
            ));
        }
        if self.provisioning.enabled && self.provisioning.infra_providers.is_empty() {
            return Err(anyhow!("provisioning.infra_providers 不能为空"));
        }
        Ok(())
    }

    /// 名称是否为保留命名空间
    pub fn is_forbidden(&self, name: &str) -> bool {
        self.forbidden_names.iter().any(|n| n == name)
    }
}

/// 创建默认配置
pub fn create_default_config() -> OperatorConfig {
    OperatorConfig {
        management_cluster: "management".to_string(),
        management_namespace: "default".to_string(),
        forbidden_names: vec![
            "default".to_string(),
            "kube-system".to_string(),
            "kube-public".to_string(),
            "kube-node-lease".to_string(),
        ],
        kubeconfig: None,
        log_level: "info".to_string(),
        ingress_domain: "local".to_string(),
        ingress_class: None,
        placement_label: "charity-project.eu/cluster".to_string(),
        mirror_namespace: true,
        retry: RetryConfig {
            max_attempts: 5,
            backoff_seconds: 5,
        },
        webhook: WebhookConfig {
            enabled: false,
            port: 9443,
            cert_path: "/etc/webhook/certs/tls.crt".to_string(),
            key_path: "/etc/webhook/certs/tls.key".to_string(),
        },
        peering: PeeringConfig {
            enabled: false,
            liqoctl: "liqoctl".to_string(),
            clusterctl: "clusterctl".to_string(),
            kubectl: "kubectl".to_string(),
            ready_timeout_seconds: 180,
        },
        provisioning: ProvisioningConfig {
            enabled: false,
            infra_providers: vec!["docker".to_string()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::load_with_env(None, env(&[])).unwrap();
        assert_eq!(config, create_default_config());
        assert!(config.is_forbidden("kube-system"));
    }

    #[test]
    fn test_env_overrides() {
        let config = OperatorConfig::load_with_env(
            None,
            env(&[
                ("CHARITY__MANAGEMENT_CLUSTER", "mgmt"),
                ("CHARITY__FORBIDDEN_NAMES", "default,monitoring"),
                ("CHARITY__RETRY__MAX_ATTEMPTS", "2"),
                ("CHARITY__PEERING__ENABLED", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.management_cluster, "mgmt");
        assert_eq!(config.forbidden_names, vec!["default", "monitoring"]);
        assert_eq!(config.retry.max_attempts, 2);
        assert!(config.peering.enabled);
    }

    #[test]
    fn test_file_then_env() {
        let dir = std::env::temp_dir().join(format!("charity-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("operator.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "management_cluster: from-file\ningress_domain: apps.example.org").unwrap();

        let config = OperatorConfig::load_with_env(
            Some(path.to_str().unwrap()),
            env(&[("CHARITY__MANAGEMENT_CLUSTER", "from-env")]),
        )
        .unwrap();

        assert_eq!(config.management_cluster, "from-env");
        assert_eq!(config.ingress_domain, "apps.example.org");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(OperatorConfig::load_with_env(Some("operator.toml"), env(&[])).is_err());
    }

    #[test]
    fn test_rejects_disabled_mirror() {
        let result = OperatorConfig::load_with_env(None, env(&[("CHARITY__MIRROR_NAMESPACE", "false")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_provisioning_providers_from_env() {
        let config = OperatorConfig::load_with_env(
            None,
            env(&[
                ("CHARITY__PROVISIONING__ENABLED", "true"),
                ("CHARITY__PROVISIONING__INFRA_PROVIDERS", "docker,openstack"),
            ]),
        )
        .unwrap();
        assert!(config.provisioning.enabled);
        assert_eq!(config.provisioning.infra_providers, vec!["docker", "openstack"]);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let result = OperatorConfig::load_with_env(None, env(&[("CHARITY__RETRY__MAX_ATTEMPTS", "0")]));
        assert!(result.is_err());
    }
}
