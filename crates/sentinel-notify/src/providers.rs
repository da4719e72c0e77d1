use crate::message::NotifyMessage;
use crate::notifier::{classify_status, classify_transport, classify_vendor_code, Notifier, NotifyError};
use crate::render::truncate_utf8;
use crate::sign::{dingtalk_sign, feishu_sign};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use sentinel_config::{ChannelConfig, ChannelKind};
use sentinel_types::Severity;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// 企业微信与钉钉的通用响应
#[derive(Debug, Deserialize)]
struct ErrcodeResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// 飞书响应，新旧两种格式
#[derive(Debug, Deserialize)]
struct FeishuResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(rename = "StatusCode", default)]
    status_code: Option<i64>,
    #[serde(rename = "StatusMessage", default)]
    status_message: Option<String>,
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))
}

/// POST JSON 并返回响应正文，非 2xx 状态按状态码分类
async fn post_json(
    client: &reqwest::Client,
    url: &str,
    headers: &HashMap<String, String>,
    body: &serde_json::Value,
) -> Result<String, NotifyError> {
    let mut request = client.post(url);
    for (key, value) in headers {
        request = request.header(key, value);
    }

    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| classify_transport(&e))?;

    let status = response.status();
    let text = response.text().await.map_err(|e| classify_transport(&e))?;
    if !status.is_success() {
        return Err(classify_status(status.as_u16(), &text));
    }
    Ok(text)
}

fn parse_errcode(vendor: &str, body: &str) -> Result<(), NotifyError> {
    let response: ErrcodeResponse = serde_json::from_str(body).map_err(|e| {
        NotifyError::Permanent(format!("{} returned unexpected body: {}", vendor, e))
    })?;
    classify_vendor_code(vendor, response.errcode, &response.errmsg)
}

// ============================================================================
// 企业微信群机器人
// ============================================================================

/// 企业微信 markdown 内容上限（字节）
const WECOM_MAX_BYTES: usize = 4096;

pub struct WecomNotifier {
    name: String,
    url: String,
    mentions: Vec<String>,
    client: reqwest::Client,
    enabled: bool,
}

impl WecomNotifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            url: url.into(),
            mentions: Vec::new(),
            client: build_client(timeout)?,
            enabled: true,
        })
    }

    pub fn with_mentions(mut self, mentions: Vec<String>) -> Self {
        self.mentions = mentions;
        self
    }

    fn build_message(&self, message: &NotifyMessage) -> serde_json::Value {
        let mut content = message.content.clone();
        if message.severity >= Severity::L2 {
            for user in &self.mentions {
                content.push_str(&format!("\n<@{}>", user));
            }
        }

        serde_json::json!({
            "msgtype": "markdown",
            "markdown": {
                "content": truncate_utf8(&content, WECOM_MAX_BYTES)
            }
        })
    }
}

#[async_trait]
impl Notifier for WecomNotifier {
    async fn send(&self, message: &NotifyMessage) -> Result<(), NotifyError> {
        let body = self.build_message(message);
        let text = post_json(&self.client, &self.url, &HashMap::new(), &body).await?;
        parse_errcode("wecom", &text)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// ============================================================================
// 飞书自定义机器人
// ============================================================================

const FEISHU_MAX_BYTES: usize = 30_000;

pub struct FeishuNotifier {
    name: String,
    url: String,
    secret: Option<String>,
    mentions: Vec<String>,
    client: reqwest::Client,
    enabled: bool,
}

impl FeishuNotifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            url: url.into(),
            secret: None,
            mentions: Vec::new(),
            client: build_client(timeout)?,
            enabled: true,
        })
    }

    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret;
        self
    }

    pub fn with_mentions(mut self, mentions: Vec<String>) -> Self {
        self.mentions = mentions;
        self
    }

    fn template(severity: Severity) -> &'static str {
        match severity {
            Severity::L1 => "blue",
            Severity::L2 => "orange",
            Severity::L3 => "red",
        }
    }

    fn build_message(&self, message: &NotifyMessage, timestamp_secs: i64) -> serde_json::Value {
        let mut content = message.content.clone();
        if message.severity >= Severity::L2 {
            for user in &self.mentions {
                content.push_str(&format!("\n<at id={}></at>", user));
            }
        }

        let mut body = serde_json::json!({
            "msg_type": "interactive",
            "card": {
                "header": {
                    "title": { "tag": "plain_text", "content": message.title },
                    "template": Self::template(message.severity)
                },
                "elements": [
                    { "tag": "markdown", "content": truncate_utf8(&content, FEISHU_MAX_BYTES) }
                ]
            }
        });

        if let Some(secret) = &self.secret {
            body["timestamp"] = serde_json::Value::String(timestamp_secs.to_string());
            body["sign"] = serde_json::Value::String(feishu_sign(secret, timestamp_secs));
        }
        body
    }
}

#[async_trait]
impl Notifier for FeishuNotifier {
    async fn send(&self, message: &NotifyMessage) -> Result<(), NotifyError> {
        let body = self.build_message(message, Utc::now().timestamp());
        let text = post_json(&self.client, &self.url, &HashMap::new(), &body).await?;

        let response: FeishuResponse = serde_json::from_str(&text).map_err(|e| {
            NotifyError::Permanent(format!("feishu returned unexpected body: {}", e))
        })?;
        let code = response.code.or(response.status_code).unwrap_or(0);
        let msg = response
            .msg
            .or(response.status_message)
            .unwrap_or_default();
        classify_vendor_code("feishu", code, &msg)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// ============================================================================
// 钉钉自定义机器人
// ============================================================================

const DINGTALK_MAX_BYTES: usize = 20_000;

pub struct DingTalkNotifier {
    name: String,
    url: String,
    secret: Option<String>,
    mentions: Vec<String>,
    client: reqwest::Client,
    enabled: bool,
}

impl DingTalkNotifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            url: url.into(),
            secret: None,
            mentions: Vec::new(),
            client: build_client(timeout)?,
            enabled: true,
        })
    }

    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret;
        self
    }

    pub fn with_mentions(mut self, mentions: Vec<String>) -> Self {
        self.mentions = mentions;
        self
    }

    /// 加签时在 URL 上附加 timestamp 与 sign
    fn signed_url(&self, timestamp_ms: i64) -> String {
        match &self.secret {
            Some(secret) => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!(
                    "{}{}timestamp={}&sign={}",
                    self.url,
                    separator,
                    timestamp_ms,
                    dingtalk_sign(secret, timestamp_ms)
                )
            }
            None => self.url.clone(),
        }
    }

    fn build_message(&self, message: &NotifyMessage) -> serde_json::Value {
        let mention = message.severity >= Severity::L2 && !self.mentions.is_empty();
        let mut text = format!("## {}\n\n{}", message.title, message.content);
        if mention {
            // 钉钉要求正文中包含 @手机号
            for mobile in &self.mentions {
                text.push_str(&format!(" @{}", mobile));
            }
        }

        serde_json::json!({
            "msgtype": "markdown",
            "markdown": {
                "title": message.title,
                "text": truncate_utf8(&text, DINGTALK_MAX_BYTES)
            },
            "at": {
                "atMobiles": if mention { self.mentions.clone() } else { Vec::new() },
                "isAtAll": false
            }
        })
    }
}

#[async_trait]
impl Notifier for DingTalkNotifier {
    async fn send(&self, message: &NotifyMessage) -> Result<(), NotifyError> {
        let body = self.build_message(message);
        let url = self.signed_url(Utc::now().timestamp_millis());
        let text = post_json(&self.client, &url, &HashMap::new(), &body).await?;
        parse_errcode("dingtalk", &text)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// ============================================================================
// 通用 Webhook
// ============================================================================

pub struct WebhookNotifier {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
    enabled: bool,
}

impl WebhookNotifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            url: url.into(),
            headers: HashMap::new(),
            client: build_client(timeout)?,
            enabled: true,
        })
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &NotifyMessage) -> Result<(), NotifyError> {
        let body = serde_json::to_value(message)
            .map_err(|e| NotifyError::Permanent(format!("serialize message: {}", e)))?;
        post_json(&self.client, &self.url, &self.headers, &body).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// ============================================================================
// 日志渠道
// ============================================================================

/// 只把通知写入日志，用于本地调试
pub struct LogNotifier {
    name: String,
}

impl LogNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &NotifyMessage) -> Result<(), NotifyError> {
        tracing::info!(
            channel = %self.name,
            instance = %message.instance_id,
            severity = %message.severity,
            fingerprint = %message.fingerprint,
            "{}\n{}",
            message.title,
            message.text
        );
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 根据渠道配置创建通知器
pub fn build_notifier(config: &ChannelConfig, timeout: Duration) -> Result<Arc<dyn Notifier>> {
    let url = || {
        config
            .url
            .clone()
            .ok_or_else(|| anyhow!("channel {}: url is required", config.name))
    };

    let notifier: Arc<dyn Notifier> = match config.kind {
        ChannelKind::Wecom => Arc::new(
            WecomNotifier::new(&config.name, url()?, timeout)?
                .with_mentions(config.mentions.clone()),
        ),
        ChannelKind::Feishu => Arc::new(
            FeishuNotifier::new(&config.name, url()?, timeout)?
                .with_secret(config.secret.clone())
                .with_mentions(config.mentions.clone()),
        ),
        ChannelKind::Dingtalk => Arc::new(
            DingTalkNotifier::new(&config.name, url()?, timeout)?
                .with_secret(config.secret.clone())
                .with_mentions(config.mentions.clone()),
        ),
        ChannelKind::Webhook => Arc::new(
            WebhookNotifier::new(&config.name, url()?, timeout)?
                .with_headers(config.headers.clone()),
        ),
        ChannelKind::Log => Arc::new(LogNotifier::new(&config.name)),
    };
    Ok(notifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured {
        bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    /// 启动返回固定响应的本地服务
    async fn serve(status: StatusCode, reply: serde_json::Value) -> (String, Captured) {
        let captured = Captured::default();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(captured): State<Captured>, Json(body): Json<serde_json::Value>| {
                        let reply = reply.clone();
                        async move {
                            captured.bodies.lock().unwrap().push(body);
                            (status, Json(reply))
                        }
                    },
                ),
            )
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/hook", addr), captured)
    }

    fn message(severity: Severity) -> NotifyMessage {
        NotifyMessage::new("[L2][警告] 慢查询 - pg-main", "**慢查询** 详情", severity)
    }

    #[tokio::test]
    async fn test_wecom_success() {
        let (url, captured) =
            serve(StatusCode::OK, serde_json::json!({"errcode": 0, "errmsg": "ok"})).await;
        let notifier = WecomNotifier::new("ops", url, Duration::from_secs(5))
            .unwrap()
            .with_mentions(vec!["zhangsan".to_string()]);

        notifier.send(&message(Severity::L2)).await.unwrap();

        let bodies = captured.bodies.lock().unwrap();
        assert_eq!(bodies[0]["msgtype"], "markdown");
        assert!(bodies[0]["markdown"]["content"]
            .as_str()
            .unwrap()
            .contains("<@zhangsan>"));
    }

    #[tokio::test]
    async fn test_wecom_rate_limit_is_transient() {
        let (url, _) = serve(
            StatusCode::OK,
            serde_json::json!({"errcode": 45009, "errmsg": "api freq out of limit"}),
        )
        .await;
        let notifier = WecomNotifier::new("ops", url, Duration::from_secs(5)).unwrap();

        let err = notifier.send(&message(Severity::L1)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_http_status_classification() {
        let (url, _) = serve(StatusCode::SERVICE_UNAVAILABLE, serde_json::json!({})).await;
        let notifier = WebhookNotifier::new("hook", url, Duration::from_secs(5)).unwrap();
        assert!(notifier
            .send(&message(Severity::L1))
            .await
            .unwrap_err()
            .is_transient());

        let (url, _) = serve(StatusCode::BAD_REQUEST, serde_json::json!({})).await;
        let notifier = WebhookNotifier::new("hook", url, Duration::from_secs(5)).unwrap();
        assert!(!notifier
            .send(&message(Severity::L1))
            .await
            .unwrap_err()
            .is_transient());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier = WebhookNotifier::new(
            "hook",
            format!("http://{}/hook", addr),
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(notifier
            .send(&message(Severity::L1))
            .await
            .unwrap_err()
            .is_transient());
    }

    #[tokio::test]
    async fn test_feishu_signed_card() {
        let (url, captured) =
            serve(StatusCode::OK, serde_json::json!({"code": 0, "msg": "success"})).await;
        let notifier = FeishuNotifier::new("dba", url, Duration::from_secs(5))
            .unwrap()
            .with_secret(Some("s3cret".to_string()));

        notifier.send(&message(Severity::L3)).await.unwrap();

        let bodies = captured.bodies.lock().unwrap();
        let body = &bodies[0];
        assert_eq!(body["msg_type"], "interactive");
        assert_eq!(body["card"]["header"]["template"], "red");
        let timestamp: i64 = body["timestamp"].as_str().unwrap().parse().unwrap();
        assert_eq!(body["sign"], feishu_sign("s3cret", timestamp));
    }

    #[tokio::test]
    async fn test_feishu_vendor_error_permanent() {
        let (url, _) = serve(
            StatusCode::OK,
            serde_json::json!({"code": 19021, "msg": "sign match fail"}),
        )
        .await;
        let notifier = FeishuNotifier::new("dba", url, Duration::from_secs(5)).unwrap();
        let err = notifier.send(&message(Severity::L1)).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_dingtalk_signed_url_and_mentions() {
        let notifier = DingTalkNotifier::new(
            "dd",
            "https://oapi.dingtalk.com/robot/send?access_token=abc",
            Duration::from_secs(5),
        )
        .unwrap()
        .with_secret(Some("SEC123".to_string()))
        .with_mentions(vec!["13800000000".to_string()]);

        let url = notifier.signed_url(1_700_000_000_000);
        assert!(url.starts_with("https://oapi.dingtalk.com/robot/send?access_token=abc&timestamp=1700000000000&sign="));

        let body = notifier.build_message(&message(Severity::L2));
        assert_eq!(body["at"]["atMobiles"][0], "13800000000");
        assert!(body["markdown"]["text"].as_str().unwrap().contains("@13800000000"));

        let body = notifier.build_message(&message(Severity::L1));
        assert!(body["at"]["atMobiles"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_build_notifier_requires_url() {
        let config = ChannelConfig::new("wecom", ChannelKind::Wecom);
        assert!(build_notifier(&config, Duration::from_secs(5)).is_err());

        let config = ChannelConfig::new("log", ChannelKind::Log);
        let notifier = build_notifier(&config, Duration::from_secs(5)).unwrap();
        assert_eq!(notifier.name(), "log");
    }
}
