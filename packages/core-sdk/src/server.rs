use std::{convert::Infallible, sync::Arc};

use anyhow::Result;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;

use crate::gateway::ChatGateway;
use crate::models::{ChatRequest, StreamItem};
use crate::telemetry;

/**
 * \brief 启动 HTTP 服务，暴露聊天网关。
 * \param addr 监听地址，如 "127.0.0.1:8000"
 */
pub async fn run(addr: &str, gateway: ChatGateway) -> Result<()> {
    let app = router(gateway);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief 组装路由；独立出来供集成测试直接挂载。
 */
pub fn router(gateway: ChatGateway) -> Router {
    Router::new()
        .route("/", get(read_root))
        .route("/api/chat", post(chat_endpoint))
        .with_state(Arc::new(gateway))
}

async fn read_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Welcome to NetCraft API" }))
}

/**
 * \brief 聊天流接口：POST /api/chat。
 * \details 响应体直接由惰性片段流构造：无内部缓冲，片段产出即冲刷；
 * 错误片段与正文同渠道输出其可读文本（与既有前端的兼容约定）。
 * 调用方断开时流被丢弃，上游 Provider 连接随之释放。
 */
async fn chat_endpoint(
    State(gateway): State<Arc<ChatGateway>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    telemetry::log_event("server.chat", &format!("msgs={}", request.messages.len()));

    let body_stream = gateway.chat_stream(request).map(|item| {
        if let StreamItem::Error(err) = &item {
            telemetry::log_error(
                "server.chat",
                &format!("inline {}: {}", err.kind, err.detail),
            );
        }
        Ok::<Bytes, Infallible>(Bytes::from(item.into_wire_text()))
    });

    (
        [(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")],
        Body::from_stream(body_stream),
    )
        .into_response()
}
