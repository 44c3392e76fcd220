use crate::error::TcmError;
use crate::packet::{Command, MessageCode};
use bytes::{Bytes, BytesMut};
use strum_macros::Display;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CommandStatus {
    Idle,
    Busy,
    Error,
}

/// A resolved command: the status code the device answered with and the
/// response payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub code: MessageCode,
    pub payload: Bytes,
}

pub type Completion = oneshot::Receiver<Result<Response, TcmError>>;

/// What happened to a response-range message handed to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Resolved,
    /// No command was pending; the caller should drop its triggers
    Discarded,
}

struct CommandSession {
    command: Command,
    response: BytesMut,
    completion: Option<oneshot::Sender<Result<Response, TcmError>>>,
}

impl CommandSession {
    fn complete(&mut self, result: Result<Response, TcmError>) {
        if let Some(tx) = self.completion.take() {
            // the waiter may already have timed out
            let _ = tx.send(result);
        }
    }
}

/// Single-outstanding-command state machine.
pub struct Coordinator {
    status: CommandStatus,
    session: Option<CommandSession>,
    max_response_length: usize,
}

impl Coordinator {
    pub fn new(max_response_length: usize) -> Self {
        Self {
            status: CommandStatus::Idle,
            session: None,
            max_response_length,
        }
    }

    pub fn status(&self) -> CommandStatus {
        self.status
    }

    /// Command of the session still waiting for its response
    pub fn pending(&self) -> Option<Command> {
        match self.status {
            CommandStatus::Busy => self.session.as_ref().map(|s| s.command),
            _ => None,
        }
    }

    /// Open a session for `command` and hand back its completion signal.
    pub fn begin(&mut self, command: Command) -> Result<Completion, TcmError> {
        if self.session.is_some() {
            return Err(TcmError::CommandPending);
        }
        let (tx, rx) = oneshot::channel();
        self.session = Some(CommandSession {
            command,
            response: BytesMut::new(),
            completion: Some(tx),
        });
        self.status = CommandStatus::Busy;
        Ok(rx)
    }

    /// Correlate a status-range message with the pending command.
    pub fn on_response(&mut self, code: MessageCode, payload: &[u8]) -> Disposition {
        let session = match (self.status, self.session.as_mut()) {
            (CommandStatus::Busy, Some(session)) => session,
            _ => {
                warn!(%code, length = payload.len(), "Response without pending command");
                return Disposition::Discarded;
            }
        };

        if payload.len() > self.max_response_length {
            let err = TcmError::Buffer(format!(
                "Response of {} bytes exceeds limit of {}",
                payload.len(),
                self.max_response_length
            ));
            self.status = CommandStatus::Error;
            session.complete(Err(err));
            return Disposition::Resolved;
        }

        session.response.clear();
        session.response.extend_from_slice(payload);
        self.status = CommandStatus::Idle;
        let response = Response {
            code,
            payload: session.response.split().freeze(),
        };
        debug!(
            command = %session.command,
            %code,
            length = response.payload.len(),
            "Command resolved"
        );
        session.complete(Ok(response));
        Disposition::Resolved
    }

    /// An IDENTIFY report arrived. Returns true if it resolved a pending
    /// command.
    pub fn on_identify(&mut self, payload: &[u8]) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if self.status != CommandStatus::Busy {
            return false;
        }

        if session.command.restarts_device() {
            self.status = CommandStatus::Idle;
            session.complete(Ok(Response {
                code: MessageCode::Identify,
                payload: Bytes::copy_from_slice(payload),
            }));
        } else {
            warn!(command = %session.command, "Device reset while command pending");
            self.status = CommandStatus::Error;
            session.complete(Err(TcmError::DeviceReset {
                command: session.command.into(),
            }));
        }
        true
    }

    /// A receive cycle failed while a command may be waiting.
    pub fn fail(&mut self, err: &TcmError) {
        if self.status != CommandStatus::Busy {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            self.status = CommandStatus::Error;
            session.complete(Err(err.clone()));
        }
    }

    /// Close the session once its waiter is done, successful or not.
    pub fn finish(&mut self) {
        self.session = None;
        self.status = CommandStatus::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_resolves_idle() {
        let mut coordinator = Coordinator::new(64);
        let mut rx = coordinator.begin(Command::GetDynamicConfig).unwrap();
        assert_eq!(coordinator.status(), CommandStatus::Busy);
        assert_eq!(coordinator.pending(), Some(Command::GetDynamicConfig));

        let disposition = coordinator.on_response(MessageCode::Ok, &[0x34, 0x12]);
        assert_eq!(disposition, Disposition::Resolved);
        assert_eq!(coordinator.status(), CommandStatus::Idle);

        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.code, MessageCode::Ok);
        assert_eq!(response.payload.as_ref(), &[0x34, 0x12]);
    }

    #[test]
    fn test_second_session_rejected() {
        let mut coordinator = Coordinator::new(64);
        let _rx = coordinator.begin(Command::Identify).unwrap();
        assert_eq!(
            coordinator.begin(Command::Reset).unwrap_err(),
            TcmError::CommandPending
        );
        coordinator.finish();
        assert!(coordinator.begin(Command::Reset).is_ok());
    }

    #[test]
    fn test_response_without_session_discarded() {
        let mut coordinator = Coordinator::new(64);
        assert_eq!(
            coordinator.on_response(MessageCode::Ok, &[]),
            Disposition::Discarded
        );
        assert_eq!(coordinator.status(), CommandStatus::Idle);
    }

    #[test]
    fn test_oversized_response_is_buffer_error() {
        let mut coordinator = Coordinator::new(4);
        let mut rx = coordinator.begin(Command::GetApplicationInfo).unwrap();
        coordinator.on_response(MessageCode::Ok, &[0; 5]);
        assert_eq!(coordinator.status(), CommandStatus::Error);
        assert!(matches!(rx.try_recv().unwrap(), Err(TcmError::Buffer(_))));
    }

    #[test]
    fn test_identify_acknowledges_reset() {
        let mut coordinator = Coordinator::new(64);
        let mut rx = coordinator.begin(Command::Reset).unwrap();
        assert!(coordinator.on_identify(&[0x02, 0x01]));
        assert_eq!(coordinator.status(), CommandStatus::Idle);
        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.code, MessageCode::Identify);
    }

    #[test]
    fn test_identify_interrupts_other_command() {
        let mut coordinator = Coordinator::new(64);
        let mut rx = coordinator.begin(Command::SetDynamicConfig).unwrap();
        assert!(coordinator.on_identify(&[]));
        assert_eq!(coordinator.status(), CommandStatus::Error);
        assert_eq!(
            rx.try_recv().unwrap().unwrap_err(),
            TcmError::DeviceReset { command: 0x24 }
        );
    }

    #[test]
    fn test_fail_releases_waiter() {
        let mut coordinator = Coordinator::new(64);
        let mut rx = coordinator.begin(Command::Identify).unwrap();
        coordinator.fail(&TcmError::Framing("bad marker".to_string()));
        assert_eq!(coordinator.status(), CommandStatus::Error);
        assert!(matches!(rx.try_recv().unwrap(), Err(TcmError::Framing(_))));
        coordinator.finish();
        assert_eq!(coordinator.status(), CommandStatus::Idle);
    }

    #[test]
    fn test_late_response_after_timeout_discarded() {
        let mut coordinator = Coordinator::new(64);
        let rx = coordinator.begin(Command::Identify).unwrap();
        drop(rx);
        coordinator.finish();
        assert_eq!(
            coordinator.on_response(MessageCode::Ok, &[1, 2, 3]),
            Disposition::Discarded
        );
    }
}
