//! # Device Sessions
//!
//! Per-connection state machine and the command dispatcher.
//!
//! ## Session States
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ┌─────────────────┐   LOGIN ok    ┌─────────────────┐                 │
//! │   │ Unauthenticated │──────────────►│  Authenticated  │◄──┐ re-LOGIN    │
//! │   └────────┬────────┘               └────────┬────────┘───┘ rebinds     │
//! │            │ LOGIN bad: INVALID_TOKEN        │                          │
//! │            │ HARDWARE: NOT_AUTHENTICATED     │                          │
//! │            │                                 │                          │
//! │            └──────────── disconnect ─────────┴──────► Closed           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Command Table
//! | Command          | Auth | Reply                                        |
//! |------------------|------|----------------------------------------------|
//! | LOGIN / LOGIN_2  | no   | SUCCESS or INVALID_TOKEN                     |
//! | PING             | no   | SUCCESS                                      |
//! | HARDWARE vw      | yes  | SUCCESS                                      |
//! | HARDWARE vr      | yes  | HARDWARE `vw\0pin\0value`, same message id   |
//! | INTERNAL         | no   | SUCCESS                                      |
//! | BRIDGE           | no   | NOT_ALLOWED                                  |
//! | RESPONSE         | no   | none                                         |
//! | anything else    | no   | ILLEGAL_COMMAND                              |

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pinhub_core::hardware::{write_body, FIELD_SEPARATOR};
use pinhub_core::{Command, CommandError, DeviceIdentity, Frame, HardwareCommand, StatusCode};

use crate::fanout::ConnectionId;
use crate::service::PinSync;

// =============================================================================
// Session
// =============================================================================

/// Authentication state of a device connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(DeviceIdentity),
    Closed,
}

/// One device connection.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    state: SessionState,
    outbound: mpsc::Sender<Frame>,
}

impl Session {
    /// Creates a session whose pushes go to `outbound`.
    pub fn new(outbound: mpsc::Sender<Frame>) -> Self {
        Session {
            id: Uuid::new_v4(),
            state: SessionState::Unauthenticated,
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        match &self.state {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity().is_some()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Routes device frames to the sync engine.
#[derive(Clone)]
pub struct Dispatcher {
    sync: PinSync,
}

impl Dispatcher {
    pub fn new(sync: PinSync) -> Self {
        Self { sync }
    }

    /// Handles one frame and returns the reply to send, if any.
    pub async fn handle(&self, session: &mut Session, frame: Frame) -> Option<Frame> {
        let message_id = frame.message_id();
        match self.dispatch(session, frame).await {
            Ok(reply) => reply,
            Err(e) => {
                match &e {
                    CommandError::ServerException(_) => {
                        warn!(connection = %session.id, error = %e, "Command failed")
                    }
                    _ => debug!(connection = %session.id, error = %e, "Command rejected"),
                }
                Some(Frame::response(message_id, e.status()))
            }
        }
    }

    /// Handles one frame.
    ///
    /// ## Returns
    /// `Ok(Some(reply))` for handled commands, `Ok(None)` for frames that
    /// need no reply, `Err` with the status to send otherwise.
    pub async fn dispatch(
        &self,
        session: &mut Session,
        frame: Frame,
    ) -> Result<Option<Frame>, CommandError> {
        let (command, message_id, body) = match frame {
            // Devices acknowledge server pushes; nothing to answer
            Frame::Response { .. } => return Ok(None),
            Frame::Message {
                command,
                message_id,
                body,
            } => (command, message_id, body),
        };

        let success = Frame::response(message_id, StatusCode::Success);

        match command {
            Command::Login | Command::Login2 => {
                self.login(session, &body).await?;
                Ok(Some(success))
            }
            Command::Ping | Command::Internal => Ok(Some(success)),
            Command::Bridge => Err(CommandError::NotAllowed("bridge".into())),
            Command::Hardware => {
                let identity = session
                    .identity()
                    .cloned()
                    .ok_or(CommandError::NotAuthenticated)?;
                self.hardware(&identity, message_id, &body).await
            }
            other => Err(CommandError::IllegalCommand(other.to_string())),
        }
    }

    /// Marks the session closed and releases its device binding.
    pub fn close(&self, session: &mut Session) {
        if let SessionState::Authenticated(identity) = &session.state {
            self.sync
                .registry()
                .release(identity.device_id, session.id);
            info!(device = %identity, connection = %session.id, "Device disconnected");
        }
        session.state = SessionState::Closed;
    }

    async fn login(&self, session: &mut Session, body: &[u8]) -> Result<(), CommandError> {
        let raw = body
            .split(|b| *b == FIELD_SEPARATOR as u8)
            .next()
            .unwrap_or_default();
        let token = std::str::from_utf8(raw).map_err(|_| CommandError::InvalidToken)?;
        if token.is_empty() {
            return Err(CommandError::InvalidToken);
        }

        let identity = self
            .sync
            .authenticate(token)
            .await
            .ok_or(CommandError::InvalidToken)?;

        if let SessionState::Authenticated(previous) = &session.state {
            if previous.device_id != identity.device_id {
                self.sync.registry().release(previous.device_id, session.id);
            }
        }

        self.sync
            .registry()
            .bind(&identity, session.id, session.outbound.clone());
        info!(device = %identity, connection = %session.id, "Device logged in");
        session.state = SessionState::Authenticated(identity);
        Ok(())
    }

    async fn hardware(
        &self,
        identity: &DeviceIdentity,
        message_id: u16,
        body: &[u8],
    ) -> Result<Option<Frame>, CommandError> {
        match HardwareCommand::parse(body)? {
            HardwareCommand::VirtualWrite { pin, value } => {
                self.sync
                    .record_device_write(identity, pin, &value)
                    .await
                    .map_err(|e| CommandError::ServerException(e.to_string()))?;
                Ok(Some(Frame::response(message_id, StatusCode::Success)))
            }
            HardwareCommand::VirtualRead { pin } => {
                let value = self.sync.read_pin(identity.device_id, pin).await;
                Ok(Some(Frame::hardware(message_id, write_body(pin, &value))))
            }
        }
    }
}
