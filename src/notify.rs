// 用户通知
//
// 引擎只在终态失败时调用一次通知接收器，消息形如
// "Failed to <phase>: <error>"；中止不通知。

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// 通知级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// 通知接收器
///
/// UI 层实现此 trait 展示用户可见的失败；默认实现写入日志。
pub trait NotificationSink: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);
}

/// 默认通知接收器：转发到 tracing 日志
#[derive(Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!("[通知] {}", message),
            Severity::Warning => warn!("[通知] {}", message),
            Severity::Error => error!("[通知] {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        messages: Mutex<Vec<(String, Severity)>>,
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, message: &str, severity: Severity) {
            self.messages
                .lock()
                .unwrap()
                .push((message.to_string(), severity));
        }
    }

    #[test]
    fn test_sink_records_message() {
        let sink = RecordingSink {
            messages: Mutex::new(Vec::new()),
        };
        sink.notify("Failed to create upload: boom", Severity::Error);

        let messages = sink.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].1, Severity::Error);
        assert!(messages[0].0.starts_with("Failed to create upload"));
    }
}
