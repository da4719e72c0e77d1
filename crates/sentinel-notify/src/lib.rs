pub mod dispatcher;
pub mod message;
pub mod notifier;
pub mod providers;
pub mod render;
pub mod router;
pub mod sign;

pub use dispatcher::{DispatchReport, Dispatcher, DispatcherHandle};
pub use message::NotifyMessage;
pub use notifier::{Notifier, NotifyError};
pub use providers::{
    build_notifier, DingTalkNotifier, FeishuNotifier, LogNotifier, WebhookNotifier, WecomNotifier,
};
pub use render::render_alert;
pub use router::ChannelRouter;
