use crate::bus::Bus;
use crate::coordinator::Disposition;
use crate::decoder;
use crate::device::{TcmDevice, lock};
use crate::framer::Link;
use crate::info::{FirmwareMode, IdentifyInfo};
use crate::packet::{MessageCode, RawMessage};
use modular_bitfield::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Event categories raised while dispatching messages
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerReason {
    pub touch: bool,
    pub gesture: bool,
    pub fingerprint: bool,
    pub fw_health: bool,
    /// Report consumed by the engine itself
    pub ignore: bool,
    /// Firmware restarted on its own and was re-identified
    pub fw_auto_reset: bool,
    #[skip]
    __: B2,
}

impl Default for TriggerReason {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerReason {
    pub fn is_empty(&self) -> bool {
        self.into_bytes() == [0]
    }

    pub fn merge(self, other: TriggerReason) -> Self {
        Self::from_bytes([self.into_bytes()[0] | other.into_bytes()[0]])
    }
}

impl<B: Bus> TcmDevice<B> {
    fn raise(&self, triggers: TriggerReason) {
        let mut current = lock(&self.inner.triggers);
        *current = current.merge(triggers);
    }

    /// Route one validated message. Runs under the bus lock, so anything
    /// that needs the bus again is spawned.
    pub(crate) fn dispatch(&self, link: &mut Link<B>, message: &RawMessage) {
        let code = message.code();
        if code == MessageCode::Identify {
            let (mode, was_pending) = self.on_identify(link, message);
            if mode != FirmwareMode::HostDownload {
                self.identify_report(mode, was_pending);
            }
            return;
        }

        if code.is_report() {
            self.dispatch_report(code, message);
        } else {
            let disposition = lock(&self.inner.coordinator).on_response(code, &message.payload);
            if disposition == Disposition::Discarded {
                *lock(&self.inner.triggers) = TriggerReason::new();
            }
        }
    }

    /// Adopt the reported identity. Returns the mode and whether a pending
    /// command was resolved by it.
    fn on_identify(&self, link: &mut Link<B>, message: &RawMessage) -> (FirmwareMode, bool) {
        let identity = IdentifyInfo::parse(&message.payload);
        let mode = identity.mode;
        info!(%mode, build_id = identity.build_id, "Received identify report");

        link.renegotiate(identity.max_write_size as usize);
        lock(&self.inner.state).identity = identity;
        let was_pending = lock(&self.inner.coordinator).on_identify(&message.payload);

        if !mode.is_operational() {
            // a held reset lock means a reset or mode switch is already
            // handling the device
            match Arc::clone(&self.inner.reset_lock).try_lock_owned() {
                Ok(guard) => {
                    info!(%mode, "Scheduling application firmware recovery");
                    let device = self.clone();
                    tokio::spawn(async move {
                        let _guard = guard;
                        let mode = device.identity().mode;
                        if mode.is_operational() {
                            debug!(%mode, "Device recovered on its own");
                            return;
                        }
                        if let Err(err) = device.enter_application().await {
                            warn!(%err, "Application firmware recovery failed");
                        }
                    });
                }
                Err(_) => debug!(%mode, "Mode change in progress, no recovery"),
            }
        }
        (mode, was_pending)
    }

    fn dispatch_report(&self, code: MessageCode, message: &RawMessage) {
        let payload = &message.payload;
        match code {
            MessageCode::Touch => self.touch_report(payload),
            MessageCode::TouchHold => self.raise(TriggerReason::new().with_fingerprint(true)),
            MessageCode::Log => {
                lock(&self.inner.health).payload = Some(payload.clone());
                self.raise(TriggerReason::new().with_fw_health(true));
            }
            _ => {
                if !lock(&self.inner.capture).offer(code, payload) {
                    debug!(%code, length = payload.len(), "Unhandled report");
                }
            }
        }
    }

    fn identify_report(&self, mode: FirmwareMode, was_pending: bool) {
        if mode != FirmwareMode::Application {
            return;
        }
        {
            let mut state = lock(&self.inner.state);
            if state.first_sync {
                state.first_sync = false;
                return;
            }
        }

        if !was_pending {
            info!("Firmware restarted, re-identifying");
            let device = self.clone();
            tokio::spawn(async move {
                match device.identify(false).await {
                    Ok(_) => device.raise(TriggerReason::new().with_fw_auto_reset(true)),
                    Err(err) => warn!(%err, "Re-identification failed"),
                }
            });
        }
        self.raise(TriggerReason::new().with_ignore(true));
    }

    fn touch_report(&self, payload: &[u8]) {
        let program = {
            let config = lock(&self.inner.report_config);
            if !config.report_touch {
                return;
            }
            config.active.clone()
        };

        let data = match decoder::decode(&program, payload, self.inner.config.max_objects) {
            Ok(data) => data,
            Err(err) => {
                warn!(%err, "Failed to decode touch report");
                return;
            }
        };

        let gesture = data.gesture();
        let mut touch = lock(&self.inner.touch);
        let suspended = touch.suspended;
        touch.data = data;
        drop(touch);

        let triggers = if suspended {
            TriggerReason::new().with_gesture(true)
        } else {
            TriggerReason::new()
                .with_touch(true)
                .with_fingerprint(gesture.is_touch_hold())
        };
        self.raise(triggers);
    }
}
