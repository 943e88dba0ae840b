//! Startup decision between the application and the update image

use log::{info, warn};

use crate::config::UPDATE_MARKER;
use crate::storage::{ByteStore, layout};

/// Transfers control to the firmware update image
pub trait UpdateHandoff {
    /// Does not return on hardware
    fn enter_update_image(&mut self);
}

/// Image to run after reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootTarget {
    Application,
    Updater,
}

/// The application only runs once an update has been confirmed by the
/// marker byte
pub fn select<S: ByteStore>(store: &S) -> BootTarget {
    match store.read(layout::UPDATE_MARKER) {
        UPDATE_MARKER => {
            info!("[BOOT] update marker present, starting application");
            BootTarget::Application
        }
        other => {
            warn!("[BOOT] update marker is {:#04x}, staying in updater", other);
            BootTarget::Updater
        }
    }
}

/// Persists the marker that lets the application boot
pub fn confirm_update<S: ByteStore>(store: &mut S) {
    store.write(layout::UPDATE_MARKER, UPDATE_MARKER);
    store.commit();
}
