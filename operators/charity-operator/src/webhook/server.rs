//! 准入 Webhook 服务
//!
//! 提供 `/validate-application`、`/validate-component`、`/validate-customcluster`
//! 与 `/healthz` 端点。
//! 证书与私钥通常由 cert-manager 签发并挂载到 Operator 容器中。

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use kube::Resource;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::validation::{
    validate_application, validate_component, validate_custom_cluster, ValidationContext, ValidationResult,
};
use crate::config::WebhookConfig;
use crate::crd::{Application, Component, CustomCluster};

/// 构造拒绝响应，原因以 `[reason] message` 的形式写入消息
fn deny_with_reason<T: Resource<DynamicType = ()>>(
    request: &AdmissionRequest<T>,
    message: &str,
    reason: &str,
) -> AdmissionReview<DynamicObject> {
    AdmissionResponse::from(request)
        .deny(format!("[{}] {}", reason, message))
        .into_review()
}

/// 处理一个准入请求
///
/// DELETE 总是允许；其余操作交给 `validate` 校验新对象。
pub fn admit<K, F>(review: AdmissionReview<K>, validate: F) -> (StatusCode, AdmissionReview<DynamicObject>)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned,
    F: FnOnce(&K, Option<&str>) -> ValidationResult,
{
    let request: AdmissionRequest<K> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!("无法解析准入请求: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                AdmissionResponse::invalid(format!("无效的 AdmissionReview: {}", e)).into_review(),
            );
        }
    };

    let uid = request.uid.clone();
    debug!(uid = %uid, operation = ?request.operation, name = ?request.name, "处理准入请求");

    if request.operation == Operation::Delete {
        return (StatusCode::OK, AdmissionResponse::from(&request).into_review());
    }

    let Some(object) = request.object.as_ref() else {
        warn!(uid = %uid, "准入请求缺少对象");
        return (StatusCode::OK, deny_with_reason(&request, "请求中缺少对象", "InvalidRequest"));
    };

    let result = validate(object, request.namespace.as_deref());
    if !result.allowed {
        let reason = result.reason.unwrap_or_else(|| "ValidationFailed".to_string());
        let message = result.message.unwrap_or_else(|| "校验失败".to_string());
        warn!(uid = %uid, reason = %reason, "拒绝准入请求: {}", message);
        return (StatusCode::OK, deny_with_reason(&request, &message, &reason));
    }

    info!(uid = %uid, name = ?request.name, "允许准入请求");
    (StatusCode::OK, AdmissionResponse::from(&request).into_review())
}

async fn validate_application_handler(
    State(ctx): State<Arc<ValidationContext>>,
    Json(review): Json<AdmissionReview<Application>>,
) -> (StatusCode, Json<AdmissionReview<DynamicObject>>) {
    let (status, review) = admit(review, |app, namespace| validate_application(app, namespace, &ctx));
    (status, Json(review))
}

async fn validate_component_handler(
    State(ctx): State<Arc<ValidationContext>>,
    Json(review): Json<AdmissionReview<Component>>,
) -> (StatusCode, Json<AdmissionReview<DynamicObject>>) {
    let (status, review) = admit(review, |component, namespace| validate_component(component, namespace, &ctx));
    (status, Json(review))
}

async fn validate_custom_cluster_handler(
    State(ctx): State<Arc<ValidationContext>>,
    Json(review): Json<AdmissionReview<CustomCluster>>,
) -> (StatusCode, Json<AdmissionReview<DynamicObject>>) {
    let (status, review) = admit(review, |cluster, namespace| validate_custom_cluster(cluster, namespace, &ctx));
    (status, Json(review))
}

async fn healthz() -> &'static str {
    "ok"
}

/// 创建 Webhook 路由
pub fn create_webhook_router(ctx: Arc<ValidationContext>) -> Router {
    Router::new()
        .route("/validate-application", post(validate_application_handler))
        .route("/validate-component", post(validate_component_handler))
        .route("/validate-customcluster", post(validate_custom_cluster_handler))
        .route("/healthz", get(healthz))
        .with_state(ctx)
}

/// 以 TLS 运行 Webhook 服务
pub async fn run_webhook_server(ctx: Arc<ValidationContext>, config: &WebhookConfig) -> Result<()> {
    let tls = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path)
        .await
        .with_context(|| format!("加载 Webhook 证书失败: {}", config.cert_path))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(port = config.port, "Webhook 服务已启动");

    axum_server::bind_rustls(addr, tls)
        .serve(create_webhook_router(ctx).into_make_service())
        .await
        .context("Webhook 服务异常退出")?;
    Ok(())
}
