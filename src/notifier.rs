//! User feedback: success/error messages on the terminal and, when enabled,
//! as desktop notifications via notify-rust (D-Bus).

use notify_rust::Notification;
use tracing::{debug, warn};

const APP_NAME: &str = "기도문 작성기";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Success,
    Error,
}

impl Level {
    fn icon(self) -> &'static str {
        match self {
            Level::Success => "document-save",
            Level::Error => "dialog-error",
        }
    }
}

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn success(&self, message: &str) {
        println!("{message}");
        self.notify(Level::Success, message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{message}");
        self.notify(Level::Error, message);
    }

    fn notify(&self, level: Level, body: &str) {
        if !self.enabled {
            return;
        }

        debug!("Notification ({level:?}): {body}");

        if let Err(e) = Notification::new()
            .summary(APP_NAME)
            .body(body)
            .icon(level.icon())
            .timeout(3000)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}
