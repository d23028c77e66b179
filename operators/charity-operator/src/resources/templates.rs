//! 清单渲染
//!
//! 根据字段值生成 Namespace/Deployment/Service/ServiceMonitor/Ingress 清单。
//! 渲染是纯函数，任何失败都表现为 `ManifestGenerationFailed`。

use charity_common::{EnvVar, Error, ExposePort, Result};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar as ContainerEnvVar, Namespace, PodSpec, PodTemplateSpec, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::json;
use std::collections::BTreeMap;

use super::ingress::IngressHost;
use super::to_dynamic;

/// 托管对象上的标记标签
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// 标记标签的值
pub const MANAGED_BY: &str = "charity-operator";

/// Deployment 渲染参数
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentParams {
    /// 组件名称
    pub name: String,
    /// 应用命名空间
    pub namespace: String,
    /// 容器镜像
    pub image: String,
    /// 环境变量
    pub env: Vec<EnvVar>,
    /// 暴露端口
    pub expose: Vec<ExposePort>,
    /// 跨集群放置选择器（键, 值）
    pub placement: Option<(String, String)>,
}

/// Service 与 ServiceMonitor 渲染参数
#[derive(Debug, Clone, PartialEq)]
pub struct PortsParams {
    /// 组件名称
    pub name: String,
    /// 应用命名空间
    pub namespace: String,
    /// 已按能力过滤的端口
    pub ports: Vec<ExposePort>,
}

/// Ingress 渲染参数
#[derive(Debug, Clone, PartialEq)]
pub struct IngressParams {
    /// 应用名称
    pub application: String,
    /// 主机条目
    pub hosts: Vec<IngressHost>,
    /// 主机名后缀
    pub domain: String,
    /// Ingress 类名
    pub class: Option<String>,
}

/// 清单渲染接口
pub trait ManifestRenderer: Send + Sync {
    /// 渲染命名空间
    fn namespace(&self, name: &str) -> Result<DynamicObject>;
    /// 渲染 Deployment
    fn deployment(&self, params: &DeploymentParams) -> Result<DynamicObject>;
    /// 渲染 Service
    fn service(&self, params: &PortsParams) -> Result<DynamicObject>;
    /// 渲染 ServiceMonitor
    fn service_monitor(&self, params: &PortsParams) -> Result<DynamicObject>;
    /// 渲染 Ingress
    fn ingress(&self, params: &IngressParams) -> Result<DynamicObject>;
}

/// ServiceMonitor 的动态资源描述
pub fn service_monitor_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("monitoring.coreos.com", "v1", "ServiceMonitor"),
        "servicemonitors",
    )
}

/// Ingress 对象名
pub fn ingress_name(application: &str) -> String {
    format!("{}-ingress", application)
}

/// 组件的 Ingress 主机名
pub fn ingress_host(component: &str, application: &str, domain: &str) -> String {
    format!("{}.{}.{}", component, application, domain)
}

/// Service 端口名
pub fn port_name(cluster_port: i32) -> String {
    format!("port-{}", cluster_port)
}

fn labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), name.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
    ])
}

fn metadata(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels(name)),
        ..Default::default()
    }
}

fn require_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ManifestGenerationFailed(format!("{} 名称不能为空", kind)));
    }
    Ok(())
}

fn require_ports(kind: &str, name: &str, ports: &[ExposePort]) -> Result<()> {
    if ports.is_empty() {
        return Err(Error::ManifestGenerationFailed(format!("{} {} 没有可用端口", kind, name)));
    }
    for port in ports {
        for value in [port.container_port, port.cluster_port] {
            if !(1..=65535).contains(&value) {
                return Err(Error::ManifestGenerationFailed(format!(
                    "{} {} 的端口 {} 超出范围",
                    kind, name, value
                )));
            }
        }
    }
    Ok(())
}

fn render<K: serde::Serialize>(kind: &str, object: &K) -> Result<DynamicObject> {
    to_dynamic(object).map_err(|e| Error::ManifestGenerationFailed(format!("{} 序列化失败: {}", kind, e)))
}

/// 默认渲染器，基于 k8s-openapi 类型构建清单
#[derive(Debug, Clone, Default)]
pub struct DefaultManifestRenderer;

impl ManifestRenderer for DefaultManifestRenderer {
    fn namespace(&self, name: &str) -> Result<DynamicObject> {
        require_name("Namespace", name)?;
        let namespace = Namespace {
            metadata: metadata(name, None),
            ..Default::default()
        };
        render("Namespace", &namespace)
    }

    fn deployment(&self, params: &DeploymentParams) -> Result<DynamicObject> {
        require_name("Deployment", &params.name)?;
        if params.image.is_empty() {
            return Err(Error::ManifestGenerationFailed(format!(
                "Deployment {} 缺少镜像",
                params.name
            )));
        }

        let ports: Vec<ContainerPort> = params
            .expose
            .iter()
            .map(|p| ContainerPort {
                container_port: p.container_port,
                ..Default::default()
            })
            .collect();
        let env: Vec<ContainerEnvVar> = params
            .env
            .iter()
            .map(|e| ContainerEnvVar {
                name: e.name.clone(),
                value: Some(e.value.clone()),
                ..Default::default()
            })
            .collect();
        let node_selector = params
            .placement
            .as_ref()
            .map(|(key, value)| BTreeMap::from([(key.clone(), value.clone())]));

        let deployment = Deployment {
            metadata: metadata(&params.name, Some(params.namespace.as_str())),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(BTreeMap::from([("app".to_string(), params.name.clone())])),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels(&params.name)),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: params.name.clone(),
                            image: Some(params.image.clone()),
                            ports: (!ports.is_empty()).then_some(ports),
                            env: (!env.is_empty()).then_some(env),
                            ..Default::default()
                        }],
                        node_selector,
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        render("Deployment", &deployment)
    }

    fn service(&self, params: &PortsParams) -> Result<DynamicObject> {
        require_name("Service", &params.name)?;
        require_ports("Service", &params.name, &params.ports)?;

        let service = Service {
            metadata: metadata(&params.name, Some(params.namespace.as_str())),
            spec: Some(ServiceSpec {
                selector: Some(BTreeMap::from([("app".to_string(), params.name.clone())])),
                ports: Some(
                    params
                        .ports
                        .iter()
                        .map(|p| ServicePort {
                            name: Some(port_name(p.cluster_port)),
                            port: p.cluster_port,
                            target_port: Some(IntOrString::Int(p.container_port)),
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        };
        render("Service", &service)
    }

    fn service_monitor(&self, params: &PortsParams) -> Result<DynamicObject> {
        require_name("ServiceMonitor", &params.name)?;
        require_ports("ServiceMonitor", &params.name, &params.ports)?;

        let endpoints: Vec<serde_json::Value> = params
            .ports
            .iter()
            .map(|p| json!({ "port": port_name(p.cluster_port), "path": "/metrics" }))
            .collect();

        let resource = service_monitor_resource();
        let mut object = DynamicObject::new(&params.name, &resource)
            .within(&params.namespace)
            .data(json!({
                "spec": {
                    "selector": { "matchLabels": { "app": params.name } },
                    "namespaceSelector": { "matchNames": [params.namespace] },
                    "endpoints": endpoints,
                }
            }));
        object.metadata.labels = Some(labels(&params.name));
        Ok(object)
    }

    fn ingress(&self, params: &IngressParams) -> Result<DynamicObject> {
        require_name("Ingress", &params.application)?;
        if params.hosts.is_empty() {
            return Err(Error::ManifestGenerationFailed(format!(
                "Ingress {} 没有主机条目",
                ingress_name(&params.application)
            )));
        }

        let rules = params
            .hosts
            .iter()
            .map(|host| IngressRule {
                host: Some(ingress_host(&host.component, &params.application, &params.domain)),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: host.component.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(host.port),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            })
            .collect();

        let name = ingress_name(&params.application);
        let ingress = Ingress {
            metadata: metadata(&name, Some(params.application.as_str())),
            spec: Some(IngressSpec {
                ingress_class_name: params.class.clone(),
                rules: Some(rules),
                ..Default::default()
            }),
            ..Default::default()
        };
        render("Ingress", &ingress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment_params() -> DeploymentParams {
        DeploymentParams {
            name: "web".into(),
            namespace: "shop".into(),
            image: "nginx:1.25".into(),
            env: vec![EnvVar {
                name: "MODE".into(),
                value: "prod".into(),
            }],
            expose: vec![ExposePort::new(80, 8080).public()],
            placement: None,
        }
    }

    #[test]
    fn test_deployment_manifest() {
        let object = DefaultManifestRenderer.deployment(&deployment_params()).unwrap();
        assert_eq!(object.metadata.name.as_deref(), Some("web"));
        assert_eq!(object.metadata.namespace.as_deref(), Some("shop"));

        let container = &object.data["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], "nginx:1.25");
        assert_eq!(container["ports"][0]["containerPort"], 80);
        assert_eq!(container["env"][0]["name"], "MODE");
        assert!(object.data["spec"]["template"]["spec"].get("nodeSelector").is_none());
    }

    #[test]
    fn test_deployment_placement_selector() {
        let mut params = deployment_params();
        params.placement = Some(("charity-project.eu/cluster".into(), "c2".into()));
        let object = DefaultManifestRenderer.deployment(&params).unwrap();
        assert_eq!(
            object.data["spec"]["template"]["spec"]["nodeSelector"]["charity-project.eu/cluster"],
            "c2"
        );
    }

    #[test]
    fn test_deployment_requires_image() {
        let mut params = deployment_params();
        params.image.clear();
        let err = DefaultManifestRenderer.deployment(&params).unwrap_err();
        assert!(matches!(err, Error::ManifestGenerationFailed(_)));
    }

    #[test]
    fn test_service_ports() {
        let params = PortsParams {
            name: "web".into(),
            namespace: "shop".into(),
            ports: vec![ExposePort::new(80, 8080).peered()],
        };
        let object = DefaultManifestRenderer.service(&params).unwrap();
        let port = &object.data["spec"]["ports"][0];
        assert_eq!(port["name"], "port-8080");
        assert_eq!(port["port"], 8080);
        assert_eq!(port["targetPort"], 80);
    }

    #[test]
    fn test_service_rejects_bad_port() {
        let params = PortsParams {
            name: "web".into(),
            namespace: "shop".into(),
            ports: vec![ExposePort::new(0, 8080).peered()],
        };
        assert!(DefaultManifestRenderer.service(&params).is_err());
    }

    #[test]
    fn test_service_monitor_endpoints() {
        let params = PortsParams {
            name: "api".into(),
            namespace: "shop".into(),
            ports: vec![ExposePort::new(9090, 9090).metrics()],
        };
        let object = DefaultManifestRenderer.service_monitor(&params).unwrap();
        assert_eq!(object.types.as_ref().unwrap().kind, "ServiceMonitor");
        assert_eq!(object.data["spec"]["endpoints"][0]["port"], "port-9090");
        assert_eq!(object.data["spec"]["endpoints"][0]["path"], "/metrics");
    }

    #[test]
    fn test_ingress_rules() {
        let params = IngressParams {
            application: "shop".into(),
            hosts: vec![IngressHost::new("web", 8080)],
            domain: "apps.example.org".into(),
            class: Some("nginx".into()),
        };
        let object = DefaultManifestRenderer.ingress(&params).unwrap();
        assert_eq!(object.metadata.name.as_deref(), Some("shop-ingress"));
        let rule = &object.data["spec"]["rules"][0];
        assert_eq!(rule["host"], "web.shop.apps.example.org");
        assert_eq!(rule["http"]["paths"][0]["backend"]["service"]["name"], "web");
        assert_eq!(rule["http"]["paths"][0]["backend"]["service"]["port"]["number"], 8080);
        assert_eq!(object.data["spec"]["ingressClassName"], "nginx");
    }
}
