use crate::bus::Bus;
use crate::capture::ReportCapture;
use crate::config::TcmConfig;
use crate::constants::TOUCH_REPORT_CONFIG_SIZE;
use crate::coordinator::{CommandStatus, Completion, Coordinator, Response};
use crate::decoder::DecodeProgram;
use crate::dispatcher::TriggerReason;
use crate::error::TcmError;
use crate::framer::{Frame, Link};
use crate::gesture::{FingerprintInfo, GestureInfo};
use crate::health::{HealthInfo, HealthMonitor, HealthSnapshot};
use crate::info::{AppInfo, AppStatus, BootInfo, FirmwareMode, IdentifyInfo};
use crate::packet::{Command, MessageCode};
use crate::touch::{AttentionTracker, TouchData, TouchPoints};
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

/// Lock a state mutex; a panicked holder leaves the data usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub(crate) struct DeviceState {
    pub(crate) identity: IdentifyInfo,
    pub(crate) app_info: AppInfo,
    pub(crate) boot_info: BootInfo,
    /// Cleared by the first application-mode IDENTIFY report
    pub(crate) first_sync: bool,
}

pub(crate) struct ReportConfig {
    /// Program the decoder runs against TOUCH reports
    pub(crate) active: Bytes,
    /// Program read back from the device during initialization
    pub(crate) default: Bytes,
    pub(crate) report_touch: bool,
}

pub(crate) struct TouchState {
    pub(crate) data: TouchData,
    pub(crate) attention: AttentionTracker,
    pub(crate) suspended: bool,
}

#[derive(Default)]
pub(crate) struct HealthState {
    pub(crate) payload: Option<Bytes>,
    pub(crate) monitor: HealthMonitor,
}

pub(crate) struct Inner<B> {
    pub(crate) config: TcmConfig,
    pub(crate) link: AsyncMutex<Link<B>>,
    command_lock: AsyncMutex<()>,
    /// Held for the whole of a reset, mode switch or recovery
    pub(crate) reset_lock: Arc<AsyncMutex<()>>,
    identify_lock: AsyncMutex<()>,
    report_lock: AsyncMutex<()>,
    pub(crate) coordinator: Mutex<Coordinator>,
    pub(crate) state: Mutex<DeviceState>,
    pub(crate) report_config: Mutex<ReportConfig>,
    pub(crate) touch: Mutex<TouchState>,
    pub(crate) health: Mutex<HealthState>,
    pub(crate) capture: Mutex<ReportCapture>,
    pub(crate) triggers: Mutex<TriggerReason>,
}

/// Handle to one touch controller.
///
/// Cloning is cheap and every clone drives the same device, so a poll loop
/// and command callers can run side by side.
pub struct TcmDevice<B> {
    pub(crate) inner: Arc<Inner<B>>,
}

impl<B> Clone for TcmDevice<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Bus> TcmDevice<B> {
    pub fn new(bus: B, config: TcmConfig) -> Result<Self, TcmError> {
        config.validate()?;
        let link = Link::new(bus, &config);
        let max_objects = config.max_objects;
        let inner = Inner {
            link: AsyncMutex::new(link),
            command_lock: AsyncMutex::new(()),
            reset_lock: Arc::new(AsyncMutex::new(())),
            identify_lock: AsyncMutex::new(()),
            report_lock: AsyncMutex::new(()),
            coordinator: Mutex::new(Coordinator::new(config.max_response_length)),
            state: Mutex::new(DeviceState {
                first_sync: true,
                ..Default::default()
            }),
            report_config: Mutex::new(ReportConfig {
                active: DecodeProgram::normal(),
                default: DecodeProgram::normal(),
                report_touch: true,
            }),
            touch: Mutex::new(TouchState {
                data: TouchData::new(max_objects),
                attention: AttentionTracker::default(),
                suspended: false,
            }),
            health: Mutex::new(HealthState::default()),
            capture: Mutex::new(ReportCapture::default()),
            triggers: Mutex::new(TriggerReason::new()),
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &TcmConfig {
        &self.inner.config
    }

    pub fn identity(&self) -> IdentifyInfo {
        lock(&self.inner.state).identity.clone()
    }

    pub fn app_info(&self) -> AppInfo {
        lock(&self.inner.state).app_info.clone()
    }

    pub fn boot_info(&self) -> BootInfo {
        lock(&self.inner.state).boot_info.clone()
    }

    pub fn command_status(&self) -> CommandStatus {
        lock(&self.inner.coordinator).status()
    }

    /// Program currently used to decode TOUCH reports
    pub fn active_report_config(&self) -> Bytes {
        lock(&self.inner.report_config).active.clone()
    }

    /// Mark the host as suspended; TOUCH reports then raise `gesture`.
    pub fn set_suspended(&self, suspended: bool) {
        lock(&self.inner.touch).suspended = suspended;
    }

    fn response_timeout_ms(&self, command: Command) -> u64 {
        let timeouts = &self.inner.config.timeouts;
        match command {
            Command::GetDynamicConfig | Command::SetDynamicConfig => timeouts.short_ms,
            Command::ProductionTest => timeouts.long_ms,
            Command::EraseFlash => timeouts.erase_flash_ms,
            Command::WriteFlash => timeouts.write_flash_ms,
            _ => timeouts.default_ms,
        }
    }

    /// Run one receive cycle and dispatch whatever arrived.
    pub(crate) async fn service(&self) -> Result<Frame, TcmError> {
        let mut link = self.inner.link.lock().await;
        match link.read_message().await {
            Ok(Frame::Message(message)) => {
                self.dispatch(&mut link, &message);
                Ok(Frame::Message(message))
            }
            Ok(frame) => Ok(frame),
            Err(err) => {
                warn!(%err, "Failed to read message");
                lock(&self.inner.coordinator).fail(&err);
                Err(err)
            }
        }
    }

    fn take_triggers(&self) -> TriggerReason {
        std::mem::take(&mut *lock(&self.inner.triggers))
    }

    /// Receive and dispatch one message, then hand back every trigger raised
    /// since the previous poll.
    pub async fn poll(&self) -> Result<TriggerReason, TcmError> {
        self.service().await?;
        Ok(self.take_triggers())
    }

    /// Drive the device from a background task, draining all pending
    /// messages every `period` and forwarding non-empty trigger sets.
    ///
    /// The task ends once the receiver is dropped.
    pub fn spawn_poll_loop(
        &self,
        period: Duration,
    ) -> (JoinHandle<()>, mpsc::Receiver<TriggerReason>) {
        let (tx, rx) = mpsc::channel(32);
        let device = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                loop {
                    match device.service().await {
                        Ok(Frame::Message(_)) => continue,
                        Ok(Frame::Idle(_)) => break,
                        Err(err) => {
                            debug!(%err, "Poll cycle failed");
                            break;
                        }
                    }
                }
                let triggers = device.take_triggers();
                if !triggers.is_empty() && tx.send(triggers).await.is_err() {
                    break;
                }
                if tx.is_closed() {
                    break;
                }
            }
        });
        (handle, rx)
    }

    /// Pump receive cycles until the session resolves or `deadline` passes.
    ///
    /// The deadline is only checked between whole receive cycles, so a
    /// message is never abandoned halfway through its continuation chunks.
    async fn await_completion(
        &self,
        completion: &mut Completion,
        command: Command,
        timeout_ms: u64,
    ) -> Result<Response, TcmError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let interval = Duration::from_millis(self.inner.config.response_poll_interval_ms);
        loop {
            match completion.try_recv() {
                Ok(result) => return result,
                Err(TryRecvError::Closed) => {
                    return Err(TcmError::Bus("Command session dropped".to_string()));
                }
                Err(TryRecvError::Empty) => {}
            }
            if Instant::now() >= deadline {
                warn!(%command, timeout_ms, "Timed out waiting for response");
                return Err(TcmError::Timeout {
                    command: command.into(),
                    timeout_ms,
                });
            }
            // read failures have already resolved the session
            if let Ok(Frame::Idle(_)) = self.service().await {
                sleep_until(deadline.min(Instant::now() + interval)).await;
            }
        }
    }

    /// Send a command and wait for its response payload.
    ///
    /// `timeout_ms` of `None` picks the command's usual deadline.
    pub async fn write_message(
        &self,
        command: Command,
        payload: &[u8],
        timeout_ms: Option<u64>,
    ) -> Result<Bytes, TcmError> {
        let _command_guard = self.inner.command_lock.lock().await;
        let mut completion = lock(&self.inner.coordinator).begin(command)?;
        let code: u8 = command.into();
        debug!(%command, payload = hex::encode(payload), "Sending command");

        let sent = {
            let mut link = self.inner.link.lock().await;
            link.write_command(code, payload).await
        };
        if let Err(err) = sent {
            warn!(%command, %err, "Failed to write command");
            lock(&self.inner.coordinator).finish();
            return Err(err);
        }

        let timeout_ms = timeout_ms.unwrap_or_else(|| self.response_timeout_ms(command));
        let outcome = self
            .await_completion(&mut completion, command, timeout_ms)
            .await;
        lock(&self.inner.coordinator).finish();

        let response = outcome?;
        if response.code == MessageCode::Error {
            let error_code = response.payload.first().copied();
            warn!(%command, ?error_code, "Device reported error");
            return Err(TcmError::DeviceReported {
                command: code,
                error_code,
            });
        }
        Ok(response.payload)
    }

    pub async fn send_command(&self, command: Command, payload: &[u8]) -> Result<Bytes, TcmError> {
        self.write_message(command, payload, None).await
    }

    /// Transmit without opening a command session.
    pub async fn raw_write(&self, command: u8, payload: &[u8]) -> Result<(), TcmError> {
        let mut link = self.inner.link.lock().await;
        link.raw_write(command, payload).await
    }

    pub async fn read_raw(&self, length: usize) -> Result<Bytes, TcmError> {
        let mut link = self.inner.link.lock().await;
        link.read_raw(length).await
    }

    pub(crate) async fn adopt_identity(&self, identity: IdentifyInfo) {
        let max_write_size = identity.max_write_size as usize;
        lock(&self.inner.state).identity = identity;
        self.inner.link.lock().await.renegotiate(max_write_size);
    }

    /// Refresh identity and the matching info record.
    ///
    /// With `send_command` false the identity from the latest IDENTIFY
    /// report is used as is.
    pub async fn identify(&self, send_command: bool) -> Result<IdentifyInfo, TcmError> {
        let _guard = self.inner.identify_lock.lock().await;
        if send_command {
            let payload = self.send_command(Command::Identify, &[]).await?;
            self.adopt_identity(IdentifyInfo::parse(&payload)).await;
        }

        let identity = self.identity();
        info!(
            mode = %identity.mode,
            part_number = %identity.part_number,
            build_id = identity.build_id,
            "Device identified"
        );
        if identity.mode == FirmwareMode::Application {
            self.get_app_info().await?;
        } else {
            self.get_boot_info().await?;
        }
        Ok(identity)
    }

    /// Fetch application info, waiting out BOOTING/UPDATING states.
    pub async fn get_app_info(&self) -> Result<AppInfo, TcmError> {
        let interval = self.inner.config.app_status_poll_interval_ms.max(1);
        let mut remaining = self.inner.config.app_status_poll_timeout_ms;
        loop {
            let payload = self.send_command(Command::GetApplicationInfo, &[]).await?;
            let app_info = AppInfo::parse(&payload);
            lock(&self.inner.state).app_info = app_info.clone();

            match app_info.status {
                AppStatus::Booting | AppStatus::Updating if remaining > 0 => {
                    debug!(status = %app_info.status, "Application not ready yet");
                    sleep(Duration::from_millis(interval)).await;
                    remaining = remaining.saturating_sub(interval);
                }
                _ => return Ok(app_info),
            }
        }
    }

    pub async fn get_boot_info(&self) -> Result<BootInfo, TcmError> {
        let payload = self.send_command(Command::GetBootInfo, &[]).await?;
        let boot_info = BootInfo::parse(&payload);
        lock(&self.inner.state).boot_info = boot_info.clone();
        Ok(boot_info)
    }

    /// Start application firmware, retrying once if the device does not
    /// come up in application mode.
    pub async fn run_application_firmware(&self) -> Result<(), TcmError> {
        let _guard = self.inner.reset_lock.lock().await;
        self.enter_application().await
    }

    /// Enter the bootloader; fails if the device stays in application mode.
    pub async fn run_bootloader_firmware(&self) -> Result<(), TcmError> {
        let _guard = self.inner.reset_lock.lock().await;
        self.enter_bootloader().await
    }

    /// Caller holds the reset lock.
    pub(crate) async fn enter_application(&self) -> Result<(), TcmError> {
        let mut retry = true;
        loop {
            self.send_command(Command::RunApplicationFirmware, &[]).await?;
            let identity = self.identify(false).await?;
            if identity.mode == FirmwareMode::Application {
                break;
            }

            warn!(
                mode = %identity.mode,
                boot_status = self.boot_info().status,
                "Failed to run application firmware"
            );
            if !retry {
                return Err(TcmError::InvalidMode(format!(
                    "still in {} mode after running application firmware",
                    identity.mode
                )));
            }
            retry = false;
        }

        let status = self.app_info().status;
        if status != AppStatus::Ok {
            warn!(%status, "Application firmware status not OK");
        }
        Ok(())
    }

    async fn enter_bootloader(&self) -> Result<(), TcmError> {
        self.send_command(Command::RunBootloaderFirmware, &[]).await?;
        let identity = self.identify(false).await?;
        if identity.mode == FirmwareMode::Application {
            return Err(TcmError::InvalidMode(
                "still in application mode after running bootloader".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn switch_mode(&self, mode: FirmwareMode) -> Result<(), TcmError> {
        let _guard = self.inner.reset_lock.lock().await;
        info!(%mode, "Switching firmware mode");
        match mode {
            FirmwareMode::Application => self.enter_application().await,
            FirmwareMode::Bootloader | FirmwareMode::TddiBootloader => {
                self.enter_bootloader().await
            }
            other => Err(TcmError::InvalidMode(format!("cannot switch to {other} mode"))),
        }
    }

    /// Software reset, ending in application firmware when possible.
    pub async fn reset(&self) -> Result<IdentifyInfo, TcmError> {
        let _guard = self.inner.reset_lock.lock().await;
        self.send_command(Command::Reset, &[]).await?;
        let mut identity = self.identify(false).await?;

        if identity.mode != FirmwareMode::Application {
            warn!(mode = %identity.mode, "Device came up outside application firmware");
            self.send_command(Command::RunApplicationFirmware, &[])
                .await?;
            identity = self.identify(false).await?;
        }
        info!(mode = %identity.mode, "Device reset");
        Ok(identity)
    }

    /// Reset the device and capture its default touch report config.
    pub async fn initialize(&self) -> Result<(), TcmError> {
        if let Err(err) = self.reset().await {
            warn!(%err, "Reset during initialization failed");
        }

        let program = self.get_touch_report_config().await?;
        let mut config = lock(&self.inner.report_config);
        config.default = program.clone();
        config.active = program;
        config.report_touch = true;
        Ok(())
    }

    pub async fn get_touch_report_config(&self) -> Result<Bytes, TcmError> {
        self.send_command(Command::GetTouchReportConfig, &[]).await
    }

    /// Install a decode program, zero-padded to the firmware's config size.
    pub async fn set_touch_report_config(&self, program: &[u8]) -> Result<(), TcmError> {
        let size = self.app_info().max_touch_report_config_size as usize;
        if size < TOUCH_REPORT_CONFIG_SIZE {
            return Err(TcmError::InvalidArgument(format!(
                "Touch report config size {size} below minimum {TOUCH_REPORT_CONFIG_SIZE}"
            )));
        }
        if program.len() > size {
            return Err(TcmError::InvalidArgument(format!(
                "Touch report config of {} bytes exceeds {size}",
                program.len()
            )));
        }

        let mut payload = vec![0u8; size];
        payload[..program.len()].copy_from_slice(program);
        self.send_command(Command::SetTouchReportConfig, &payload)
            .await?;
        Ok(())
    }

    /// Switch between the normal and the gesture report layout.
    pub async fn set_input_reporting(&self, suspended: bool) -> Result<(), TcmError> {
        let _guard = self.inner.report_lock.lock().await;
        let (mode, status) = {
            let state = lock(&self.inner.state);
            (state.identity.mode, state.app_info.status)
        };
        if mode != FirmwareMode::Application || status != AppStatus::Ok {
            info!(%mode, %status, "Application firmware not running, input reporting unchanged");
            return Ok(());
        }

        lock(&self.inner.report_config).report_touch = false;
        let program = if suspended {
            DecodeProgram::gesture()
        } else {
            DecodeProgram::normal()
        };

        let result = match self.set_touch_report_config(&program).await {
            Ok(()) => self.get_touch_report_config().await,
            Err(err) => Err(err),
        };
        let mut config = lock(&self.inner.report_config);
        match result {
            Ok(active) => {
                config.active = active;
                config.report_touch = true;
                Ok(())
            }
            Err(err) => {
                warn!(%err, suspended, "Failed to set input reporting, restoring default config");
                config.active = config.default.clone();
                config.report_touch = false;
                Err(err)
            }
        }
    }

    /// Points for every active slot, plus one final report per lift.
    pub fn get_touch_points(&self) -> TouchPoints {
        let chip_max = lock(&self.inner.state).app_info.coordinate_range();
        let mut touch = lock(&self.inner.touch);
        let TouchState {
            data, attention, ..
        } = &mut *touch;
        attention.points(data, self.inner.config.resolution, chip_max)
    }

    pub fn get_gesture_info(&self) -> GestureInfo {
        let chip_max = lock(&self.inner.state).app_info.coordinate_range();
        let gesture = GestureInfo::from_touch_data(&lock(&self.inner.touch).data);
        match self.inner.config.resolution {
            Some(res) => gesture.scaled((res.max_x, res.max_y), chip_max),
            None => gesture,
        }
    }

    pub fn get_fingerprint_info(&self) -> Option<FingerprintInfo> {
        FingerprintInfo::from_touch_data(&lock(&self.inner.touch).data)
    }

    /// Parse the latest LOG report; `None` until one has arrived.
    pub fn get_health_snapshot(&self) -> Result<Option<HealthSnapshot>, TcmError> {
        let mut health = lock(&self.inner.health);
        let Some(payload) = health.payload.clone() else {
            return Ok(None);
        };
        let info = HealthInfo::parse(&payload)?;
        let events = health.monitor.update(info);
        Ok(Some(HealthSnapshot { info, events }))
    }

    pub async fn get_static_config(&self) -> Result<Bytes, TcmError> {
        self.send_command(Command::GetStaticConfig, &[]).await
    }

    /// Replace the static config block; its size is fixed by the firmware.
    pub async fn set_static_config(&self, config: &[u8]) -> Result<(), TcmError> {
        let size = self.app_info().static_config_size as usize;
        if config.len() != size {
            return Err(TcmError::InvalidArgument(format!(
                "Static config of {} bytes, firmware expects {size}",
                config.len()
            )));
        }
        self.send_command(Command::SetStaticConfig, config).await?;
        Ok(())
    }

    pub async fn get_dynamic_config(&self, id: u8) -> Result<u16, TcmError> {
        let payload = self.send_command(Command::GetDynamicConfig, &[id]).await?;
        if payload.len() < 2 {
            return Err(TcmError::Buffer(format!(
                "Dynamic config {id:#04x} response of {} bytes",
                payload.len()
            )));
        }
        Ok(u16::from_le_bytes([payload[0], payload[1]]))
    }

    pub async fn set_dynamic_config(&self, id: u8, value: u16) -> Result<(), TcmError> {
        debug!(id, value, "Setting dynamic config");
        let [lo, hi] = value.to_le_bytes();
        self.send_command(Command::SetDynamicConfig, &[id, lo, hi])
            .await?;
        Ok(())
    }

    pub async fn sleep(&self, enable: bool) -> Result<(), TcmError> {
        let command = if enable {
            Command::EnterDeepSleep
        } else {
            Command::ExitDeepSleep
        };
        info!(enable, "Deep sleep");
        self.send_command(command, &[]).await?;
        Ok(())
    }

    pub async fn enable_report(&self, code: MessageCode, enable: bool) -> Result<(), TcmError> {
        let command = if enable {
            Command::EnableReport
        } else {
            Command::DisableReport
        };
        let report: u8 = code.into();
        self.send_command(command, &[report]).await?;
        Ok(())
    }

    /// Enable a report type and collect `count` of them.
    ///
    /// The report is disabled again whether or not collection completed.
    pub async fn collect_reports(
        &self,
        code: MessageCode,
        count: usize,
    ) -> Result<Vec<Bytes>, TcmError> {
        let mut done = lock(&self.inner.capture).arm(code, count);
        if let Err(err) = self.enable_report(code, true).await {
            lock(&self.inner.capture).disarm();
            return Err(err);
        }

        let timeout_ms = self.inner.config.timeouts.report_ms * count as u64;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let interval = Duration::from_millis(self.inner.config.response_poll_interval_ms);
        let collected = loop {
            if let Ok(frames) = done.try_recv() {
                break Some(frames);
            }
            if Instant::now() >= deadline {
                break None;
            }
            match self.service().await {
                Ok(Frame::Message(_)) => {}
                Ok(Frame::Idle(_)) | Err(_) => {
                    sleep_until(deadline.min(Instant::now() + interval)).await
                }
            }
        };
        lock(&self.inner.capture).disarm();

        if let Err(err) = self.enable_report(code, false).await {
            warn!(%code, %err, "Failed to disable report");
        }
        collected.ok_or_else(|| {
            warn!(%code, count, "Report collection timed out");
            TcmError::Timeout {
                command: Command::EnableReport.into(),
                timeout_ms,
            }
        })
    }

    pub async fn production_test(&self, test_id: u8) -> Result<Bytes, TcmError> {
        let (mode, status) = {
            let state = lock(&self.inner.state);
            (state.identity.mode, state.app_info.status)
        };
        if mode != FirmwareMode::Application || status != AppStatus::Ok {
            return Err(TcmError::InvalidMode(format!(
                "production test needs running application firmware ({mode}, {status})"
            )));
        }
        self.send_command(Command::ProductionTest, &[test_id]).await
    }
}
