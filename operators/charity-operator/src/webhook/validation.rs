//! 准入校验规则
//!
//! 所有规则都是纯函数，只读取对象与校验上下文，不修改任何状态。
//! 规则按顺序检查，遇到第一个失败即拒绝。

use charity_common::{is_dns_label, is_kubernetes_version, validate_expose};
use charity_controller::ContextResolver;
use kube::ResourceExt;
use std::sync::Arc;

use crate::config::OperatorConfig;
use crate::crd::{Application, Component, CustomCluster};

/// 校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// 是否允许写入
    pub allowed: bool,
    /// 拒绝原因（机器可读）
    pub reason: Option<String>,
    /// 拒绝说明
    pub message: Option<String>,
}

impl ValidationResult {
    /// 允许
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    /// 拒绝
    pub fn denied(reason: &str, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }
}

/// 校验上下文
pub struct ValidationContext {
    /// Operator 配置
    pub config: Arc<OperatorConfig>,
    /// 集群上下文解析器
    pub resolver: Arc<dyn ContextResolver>,
}

impl ValidationContext {
    /// 创建新的校验上下文
    pub fn new(config: Arc<OperatorConfig>, resolver: Arc<dyn ContextResolver>) -> Self {
        Self { config, resolver }
    }

    fn check_cluster(&self, field: &str, cluster: &str) -> Option<ValidationResult> {
        if cluster == self.config.management_cluster {
            return Some(ValidationResult::denied(
                "ManagementCluster",
                format!("{} 不能是管理集群 {}", field, cluster),
            ));
        }
        if let Err(e) = self.resolver.resolve(cluster) {
            return Some(ValidationResult::denied(
                "UnknownCluster",
                format!("{} 无法解析: {}", field, e),
            ));
        }
        None
    }
}

fn check_dns_label(field: &str, value: &str) -> Option<ValidationResult> {
    (!is_dns_label(value)).then(|| {
        ValidationResult::denied("InvalidName", format!("{} {:?} 不是合法的 DNS 标签", field, value))
    })
}

/// 命名空间只在请求或对象给出时检查
fn check_identity(object_name: &str, spec_name: &str, namespace: Option<&str>, expected_ns: &str) -> Option<ValidationResult> {
    if let Some(namespace) = namespace.filter(|ns| *ns != expected_ns) {
        return Some(ValidationResult::denied(
            "WrongNamespace",
            format!("对象必须位于命名空间 {}，实际为 {}", expected_ns, namespace),
        ));
    }
    if object_name != spec_name {
        return Some(ValidationResult::denied(
            "NameMismatch",
            format!("metadata.name {} 与 spec.name {} 不一致", object_name, spec_name),
        ));
    }
    None
}

/// 校验 Application
pub fn validate_application(app: &Application, namespace: Option<&str>, ctx: &ValidationContext) -> ValidationResult {
    let spec = &app.spec;

    if let Some(denied) = check_dns_label("应用名称", &spec.name) {
        return denied;
    }
    for component in &spec.components {
        if let Some(denied) = check_dns_label("组件名称", &component.name) {
            return denied;
        }
    }

    if ctx.config.is_forbidden(&spec.name) {
        return ValidationResult::denied("ForbiddenName", format!("应用名称 {} 是保留名称", spec.name));
    }

    if let Some(denied) = ctx.check_cluster("应用集群", &spec.cluster) {
        return denied;
    }
    for component in &spec.components {
        if let Some(denied) = ctx.check_cluster(&format!("组件 {} 的集群", component.name), &component.cluster) {
            return denied;
        }
    }

    let namespace = namespace.or(app.metadata.namespace.as_deref());
    if let Some(denied) = check_identity(&app.name_any(), &spec.name, namespace, &ctx.config.management_namespace) {
        return denied;
    }

    ValidationResult::allowed()
}

/// 校验 Component
///
/// 组件位于以应用命名的命名空间中。
pub fn validate_component(component: &Component, namespace: Option<&str>, ctx: &ValidationContext) -> ValidationResult {
    let spec = &component.spec;

    if let Some(denied) = check_dns_label("组件名称", &spec.name) {
        return denied;
    }
    if let Some(denied) = check_dns_label("应用名称", &spec.application) {
        return denied;
    }

    if let Err(e) = validate_expose(&spec.expose) {
        return ValidationResult::denied("InvalidExpose", e.to_string());
    }

    if let Some(denied) = ctx.check_cluster("组件集群", &spec.cluster) {
        return denied;
    }

    let namespace = namespace.or(component.metadata.namespace.as_deref());
    if let Some(denied) = check_identity(&component.name_any(), &spec.name, namespace, &spec.application) {
        return denied;
    }

    ValidationResult::allowed()
}

/// 校验 CustomCluster
///
/// CustomCluster 与 Application 同在管理命名空间中，metadata.name 必须等于
/// spec.name，因此集群名的唯一性由 API 服务器保证。
pub fn validate_custom_cluster(cluster: &CustomCluster, namespace: Option<&str>, ctx: &ValidationContext) -> ValidationResult {
    let spec = &cluster.spec;

    if let Some(denied) = check_dns_label("集群名称", &spec.name) {
        return denied;
    }
    if spec.name == ctx.config.management_cluster {
        return ValidationResult::denied("ManagementCluster", format!("集群名称 {} 与管理集群重名", spec.name));
    }

    let providers = &ctx.config.provisioning.infra_providers;
    if !providers.contains(&spec.infra_provider) {
        return ValidationResult::denied(
            "UnsupportedProvider",
            format!("不支持的基础设施提供方 {}，可选: {}", spec.infra_provider, providers.join(", ")),
        );
    }

    if !is_kubernetes_version(&spec.kubernetes_version) {
        return ValidationResult::denied(
            "InvalidVersion",
            format!("{} 不是合法的 Kubernetes 版本", spec.kubernetes_version),
        );
    }
    if spec.control_plane_count == Some(0) {
        return ValidationResult::denied("InvalidScale", "控制平面节点数至少为 1");
    }

    let namespace = namespace.or(cluster.metadata.namespace.as_deref());
    if let Some(denied) = check_identity(&cluster.name_any(), &spec.name, namespace, &ctx.config.management_namespace) {
        return denied;
    }

    ValidationResult::allowed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::create_default_config;
    use crate::crd::{ApplicationSpec, ComponentSpec, CustomClusterSpec};
    use charity_common::{ComponentRef, Error, ExposePort};
    use charity_controller::{ClusterContext, MockContextResolver};
    use rstest::rstest;

    fn context() -> ValidationContext {
        let mut resolver = MockContextResolver::new();
        resolver.expect_resolve().returning(|cluster| match cluster {
            "c1" | "c2" | "management" => Ok(ClusterContext::new(cluster, format!("kind-{}", cluster))),
            other => Err(Error::ClusterNotFound(other.to_string())),
        });
        ValidationContext::new(Arc::new(create_default_config()), Arc::new(resolver))
    }

    fn application(name: &str, cluster: &str, components: Vec<ComponentRef>) -> Application {
        let mut app = Application::new(
            name,
            ApplicationSpec {
                name: name.into(),
                owner: "team-a".into(),
                cluster: cluster.into(),
                components,
            },
        );
        app.metadata.namespace = Some("default".into());
        app
    }

    fn component(expose: Vec<ExposePort>) -> Component {
        let mut component = Component::new(
            "web",
            ComponentSpec {
                name: "web".into(),
                application: "shop".into(),
                image: "nginx:1.25".into(),
                cluster: "c1".into(),
                env: vec![],
                expose,
            },
        );
        component.metadata.namespace = Some("shop".into());
        component
    }

    fn reason(result: &ValidationResult) -> Option<&str> {
        result.reason.as_deref()
    }

    #[test]
    fn test_valid_application() {
        let app = application("shop", "c1", vec![ComponentRef::new("web", "c1"), ComponentRef::new("db", "c2")]);
        assert!(validate_application(&app, Some("default"), &context()).allowed);
    }

    #[rstest]
    #[case("Shop_1", "c1", "InvalidName")]
    #[case("kube-system", "c1", "ForbiddenName")]
    #[case("shop", "management", "ManagementCluster")]
    #[case("shop", "c9", "UnknownCluster")]
    fn test_application_rejections(#[case] name: &str, #[case] cluster: &str, #[case] expected: &str) {
        let app = application(name, cluster, vec![]);
        let result = validate_application(&app, Some("default"), &context());
        assert!(!result.allowed);
        assert_eq!(reason(&result), Some(expected));
    }

    #[test]
    fn test_application_component_cluster_checked() {
        let app = application("shop", "c1", vec![ComponentRef::new("web", "management")]);
        let result = validate_application(&app, Some("default"), &context());
        assert_eq!(reason(&result), Some("ManagementCluster"));

        let app = application("shop", "c1", vec![ComponentRef::new("bad_name", "c1")]);
        assert_eq!(reason(&validate_application(&app, None, &context())), Some("InvalidName"));
    }

    #[test]
    fn test_application_namespace_and_name() {
        let app = application("shop", "c1", vec![]);
        let result = validate_application(&app, Some("shop"), &context());
        assert_eq!(reason(&result), Some("WrongNamespace"));

        let mut renamed = application("shop", "c1", vec![]);
        renamed.metadata.name = Some("store".into());
        let result = validate_application(&renamed, Some("default"), &context());
        assert_eq!(reason(&result), Some("NameMismatch"));
    }

    #[test]
    fn test_missing_namespace_is_not_checked() {
        let mut app = application("shop", "c1", vec![]);
        app.metadata.namespace = None;
        assert!(validate_application(&app, None, &context()).allowed);

        let mut web = component(vec![]);
        web.metadata.namespace = None;
        assert!(validate_component(&web, None, &context()).allowed);

        web.metadata.name = Some("api".into());
        assert_eq!(reason(&validate_component(&web, None, &context())), Some("NameMismatch"));
    }

    #[test]
    fn test_valid_component() {
        let component = component(vec![ExposePort::new(80, 8080).public(), ExposePort::new(9100, 9100).metrics()]);
        assert!(validate_component(&component, Some("shop"), &context()).allowed);
    }

    #[test]
    fn test_component_two_public_ports_rejected() {
        let component = component(vec![ExposePort::new(80, 8080).public(), ExposePort::new(443, 8443).public()]);
        let result = validate_component(&component, Some("shop"), &context());
        assert_eq!(reason(&result), Some("InvalidExpose"));
    }

    #[test]
    fn test_component_public_requires_peered() {
        let mut port = ExposePort::new(80, 8080);
        port.is_public = true;
        let result = validate_component(&component(vec![port]), Some("shop"), &context());
        assert_eq!(reason(&result), Some("InvalidExpose"));
    }

    #[test]
    fn test_component_metrics_requires_peered() {
        let mut port = ExposePort::new(9100, 9100);
        port.is_exposing_metrics = true;
        let result = validate_component(&component(vec![port]), Some("shop"), &context());
        assert_eq!(reason(&result), Some("InvalidExpose"));
    }

    fn custom_cluster(name: &str, provider: &str, version: &str) -> CustomCluster {
        let mut cluster = CustomCluster::new(
            name,
            CustomClusterSpec {
                name: name.into(),
                infra_provider: provider.into(),
                kubernetes_version: version.into(),
                worker_machine_count: 2,
                control_plane_count: Some(1),
                flavor: None,
            },
        );
        cluster.metadata.namespace = Some("default".into());
        cluster
    }

    #[test]
    fn test_valid_custom_cluster() {
        let cluster = custom_cluster("c3", "docker", "v1.26.3");
        assert!(validate_custom_cluster(&cluster, Some("default"), &context()).allowed);
    }

    #[rstest]
    #[case("c_3", "docker", "v1.26.3", "InvalidName")]
    #[case("management", "docker", "v1.26.3", "ManagementCluster")]
    #[case("c3", "openstack", "v1.26.3", "UnsupportedProvider")]
    #[case("c3", "docker", "1.26", "InvalidVersion")]
    fn test_custom_cluster_rejections(
        #[case] name: &str,
        #[case] provider: &str,
        #[case] version: &str,
        #[case] expected: &str,
    ) {
        let cluster = custom_cluster(name, provider, version);
        let result = validate_custom_cluster(&cluster, Some("default"), &context());
        assert!(!result.allowed);
        assert_eq!(reason(&result), Some(expected));
    }

    #[test]
    fn test_custom_cluster_identity_and_scale() {
        let mut cluster = custom_cluster("c3", "docker", "v1.26.3");
        cluster.spec.control_plane_count = Some(0);
        assert_eq!(
            reason(&validate_custom_cluster(&cluster, Some("default"), &context())),
            Some("InvalidScale")
        );

        let cluster = custom_cluster("c3", "docker", "v1.26.3");
        assert_eq!(
            reason(&validate_custom_cluster(&cluster, Some("shop"), &context())),
            Some("WrongNamespace")
        );

        let mut renamed = custom_cluster("c3", "docker", "v1.26.3");
        renamed.metadata.name = Some("c4".into());
        assert_eq!(
            reason(&validate_custom_cluster(&renamed, Some("default"), &context())),
            Some("NameMismatch")
        );
    }

    #[test]
    fn test_component_namespace_must_match_application() {
        let result = validate_component(&component(vec![]), Some("default"), &context());
        assert_eq!(reason(&result), Some("WrongNamespace"));
    }
}
