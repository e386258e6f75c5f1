use std::path::Path;

use sd_notify::NotifyState;
use tracing::{debug, info, warn};

/// Present when systemd is the init system.
const SYSTEMD_RUNTIME_DIR: &str = "/run/systemd/system";

/// Tells the process supervisor that the first snapshot is on disk.
/// Failing to do so is logged and otherwise ignored.
pub fn notify_ready() {
    if std::env::var_os("NOTIFY_SOCKET").is_none() {
        if Path::new(SYSTEMD_RUNTIME_DIR).exists() {
            warn!("No notification socket under systemd, forgot to set Type=notify in the service file?");
        } else {
            debug!("No process supervisor to notify");
        }
        return;
    }

    match sd_notify::notify(false, &[NotifyState::Ready]) {
        Ok(()) => info!("Notified process supervisor of readiness"),
        Err(e) => warn!("Failed to notify process supervisor of readiness: {}", e),
    }
}
