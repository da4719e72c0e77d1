use sentinel_types::{Alert, Evidence, Severity};
use std::fmt::Write;

use crate::message::NotifyMessage;

/// 按级别渲染告警
///
/// - L1：单行结论
/// - L2：结论 + 关键指标
/// - L3：完整证据、SQL 文本与指纹
pub fn render_alert(alert: &Alert) -> NotifyMessage {
    let title = alert.title();
    let (content, text) = match alert.severity {
        Severity::L1 => render_l1(alert),
        Severity::L2 => render_l2(alert),
        Severity::L3 => render_l3(alert),
    };

    let mut message = NotifyMessage::new(title, content, alert.severity).with_text(text);
    message.instance_id = alert.instance_id().to_string();
    message.fingerprint = alert.fingerprint.to_string();
    message.timestamp = alert.emitted_at;
    if let Ok(value) = serde_json::to_value(alert) {
        message.metadata = Some(value);
    }
    message
}

fn header(alert: &Alert) -> String {
    let mut line = format!("**{}**", alert.title());
    if alert.escalated {
        line.push_str(" (级别升高)");
    }
    line
}

fn suppressed_note(alert: &Alert) -> Option<String> {
    if alert.suppressed_since_last > 0 {
        Some(format!(
            "上次告警以来重复检测 {} 次",
            alert.suppressed_since_last
        ))
    } else {
        None
    }
}

fn render_l1(alert: &Alert) -> (String, String) {
    let content = format!("{} {}", header(alert), alert.conclusion);
    let text = format!("{} {}", alert.title(), alert.conclusion);
    (content, text)
}

fn render_l2(alert: &Alert) -> (String, String) {
    let mut content = String::new();
    let mut text = String::new();
    let _ = writeln!(content, "{}\n", header(alert));
    let _ = writeln!(content, "{}\n", alert.conclusion);
    let _ = writeln!(text, "{}", alert.title());
    let _ = writeln!(text, "{}", alert.conclusion);

    for (name, value) in alert.finding.evidence.key_metrics() {
        let _ = writeln!(content, "> {}: {}", name, value);
        let _ = writeln!(text, "{}: {}", name, value);
    }
    if let Some(note) = suppressed_note(alert) {
        let _ = writeln!(content, "\n{}", note);
        let _ = writeln!(text, "{}", note);
    }
    (content.trim_end().to_string(), text.trim_end().to_string())
}

fn render_l3(alert: &Alert) -> (String, String) {
    let (mut content, mut text) = render_l2(alert);
    let finding = &alert.finding;

    content.push_str("\n\n");
    text.push('\n');

    let _ = writeln!(content, "> 实例: {}", finding.instance_id);
    let _ = writeln!(text, "实例: {}", finding.instance_id);
    if let Some(database) = &finding.database {
        let _ = writeln!(content, "> 数据库: {}", database);
        let _ = writeln!(text, "数据库: {}", database);
    }
    let _ = writeln!(content, "> 对象: {}", finding.subject);
    let _ = writeln!(text, "对象: {}", finding.subject);
    let detected = finding.detected_at.format("%Y-%m-%d %H:%M:%S UTC");
    let _ = writeln!(content, "> 检测时间: {}", detected);
    let _ = writeln!(text, "检测时间: {}", detected);

    if let Evidence::MissingIndex { ddl, .. } = &finding.evidence {
        let _ = write!(content, "\n建议索引:\n```sql\n{}\n```\n", ddl);
        let _ = writeln!(text, "建议索引: {}", ddl);
    }
    if let Some(query) = &finding.query {
        let _ = write!(content, "\nSQL:\n```sql\n{}\n```\n", query);
        let _ = writeln!(text, "SQL: {}", query);
    }

    let _ = write!(content, "\n指纹: `{}`", alert.fingerprint);
    let _ = write!(text, "指纹: {}", alert.fingerprint);
    (content, text)
}

/// 按字节截断，不切断 UTF-8 字符
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
