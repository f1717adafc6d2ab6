//! # Protocol Tables
//!
//! Command and status codes of the Blynk-compatible device protocol.
//!
//! ## Header Layout
//! ```text
//! ┌──────────┬──────────────┬──────────────────────┬──────────────────────┐
//! │ command  │  message id  │  length │ status     │  body (length bytes) │
//! │  1 byte  │  u16 BE      │  u16 BE              │  absent for RESPONSE │
//! └──────────┴──────────────┴──────────────────────┴──────────────────────┘
//! ```
//!
//! Codes the gateway does not understand are preserved as `Other(_)` so the
//! dispatcher can answer them instead of dropping the connection.

use std::fmt;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 5;

/// Default upper bound on a frame body.
pub const DEFAULT_MAX_BODY: usize = 1024;

/// Number of virtual pins per device (`0..PIN_COUNT`).
pub const PIN_COUNT: u8 = 128;

/// Message id used for frames the server originates.
pub const SERVER_MESSAGE_ID: u16 = 1;

// =============================================================================
// Command
// =============================================================================

/// Wire command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Response,
    Register,
    Login,
    SaveProfile,
    LoadProfile,
    GetToken,
    Ping,
    Activate,
    Deactivate,
    Refresh,
    GetGraphData,
    GetGraphDataResponse,
    Tweet,
    Email,
    Notify,
    Bridge,
    HardwareSync,
    Internal,
    Sms,
    Property,
    Hardware,
    CreateDash,
    SaveDash,
    DeleteDash,
    LoadProfileGzipped,
    Sharing,
    AddPushToken,
    /// Extended login (`hw-login`); handled exactly like [`Command::Login`].
    Login2,
    Redirect,
    DebugPrint,
    /// Any byte not in the table above.
    Other(u8),
}

impl Command {
    /// Returns the wire byte for this command.
    pub fn code(self) -> u8 {
        match self {
            Command::Response => 0,
            Command::Register => 1,
            Command::Login => 2,
            Command::SaveProfile => 3,
            Command::LoadProfile => 4,
            Command::GetToken => 5,
            Command::Ping => 6,
            Command::Activate => 7,
            Command::Deactivate => 8,
            Command::Refresh => 9,
            Command::GetGraphData => 10,
            Command::GetGraphDataResponse => 11,
            Command::Tweet => 12,
            Command::Email => 13,
            Command::Notify => 14,
            Command::Bridge => 15,
            Command::HardwareSync => 16,
            Command::Internal => 17,
            Command::Sms => 18,
            Command::Property => 19,
            Command::Hardware => 20,
            Command::CreateDash => 21,
            Command::SaveDash => 22,
            Command::DeleteDash => 23,
            Command::LoadProfileGzipped => 24,
            Command::Sharing => 25,
            Command::AddPushToken => 26,
            Command::Login2 => 29,
            Command::Redirect => 41,
            Command::DebugPrint => 55,
            Command::Other(code) => code,
        }
    }

    /// Returns true for both login variants.
    pub fn is_login(self) -> bool {
        matches!(self, Command::Login | Command::Login2)
    }
}

impl From<u8> for Command {
    fn from(code: u8) -> Self {
        match code {
            0 => Command::Response,
            1 => Command::Register,
            2 => Command::Login,
            3 => Command::SaveProfile,
            4 => Command::LoadProfile,
            5 => Command::GetToken,
            6 => Command::Ping,
            7 => Command::Activate,
            8 => Command::Deactivate,
            9 => Command::Refresh,
            10 => Command::GetGraphData,
            11 => Command::GetGraphDataResponse,
            12 => Command::Tweet,
            13 => Command::Email,
            14 => Command::Notify,
            15 => Command::Bridge,
            16 => Command::HardwareSync,
            17 => Command::Internal,
            18 => Command::Sms,
            19 => Command::Property,
            20 => Command::Hardware,
            21 => Command::CreateDash,
            22 => Command::SaveDash,
            23 => Command::DeleteDash,
            24 => Command::LoadProfileGzipped,
            25 => Command::Sharing,
            26 => Command::AddPushToken,
            29 => Command::Login2,
            41 => Command::Redirect,
            55 => Command::DebugPrint,
            other => Command::Other(other),
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        command.code()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Other(code) => write!(f, "Other({})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

// =============================================================================
// Status Code
// =============================================================================

/// Status carried in the third header field of a RESPONSE frame.
///
/// Note that `Success` is 200 while every failure is a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    QuotaLimit,
    IllegalCommand,
    NotRegistered,
    AlreadyRegistered,
    NotAuthenticated,
    NotAllowed,
    NoActiveDashboard,
    InvalidToken,
    IllegalCommandBody,
    GetGraphDataException,
    NoData,
    DeviceWentOffline,
    ServerException,
    NtfInvalidBody,
    NtfNotAuthorized,
    NtfException,
    Timeout,
    NoLoginTimeout,
    InvalidCommandFormat,
    /// Any value not in the table above.
    Other(u16),
}

impl StatusCode {
    /// Returns the wire value for this status.
    pub fn code(self) -> u16 {
        match self {
            StatusCode::Success => 200,
            StatusCode::QuotaLimit => 1,
            StatusCode::IllegalCommand => 2,
            StatusCode::NotRegistered => 3,
            StatusCode::AlreadyRegistered => 4,
            StatusCode::NotAuthenticated => 5,
            StatusCode::NotAllowed => 6,
            StatusCode::NoActiveDashboard => 7,
            StatusCode::InvalidToken => 8,
            StatusCode::IllegalCommandBody => 9,
            StatusCode::GetGraphDataException => 10,
            StatusCode::NoData => 11,
            StatusCode::DeviceWentOffline => 12,
            StatusCode::ServerException => 13,
            StatusCode::NtfInvalidBody => 14,
            StatusCode::NtfNotAuthorized => 15,
            StatusCode::NtfException => 16,
            StatusCode::Timeout => 17,
            StatusCode::NoLoginTimeout => 18,
            StatusCode::InvalidCommandFormat => 19,
            StatusCode::Other(code) => code,
        }
    }

    /// Returns true if this is the success status.
    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        match code {
            200 => StatusCode::Success,
            1 => StatusCode::QuotaLimit,
            2 => StatusCode::IllegalCommand,
            3 => StatusCode::NotRegistered,
            4 => StatusCode::AlreadyRegistered,
            5 => StatusCode::NotAuthenticated,
            6 => StatusCode::NotAllowed,
            7 => StatusCode::NoActiveDashboard,
            8 => StatusCode::InvalidToken,
            9 => StatusCode::IllegalCommandBody,
            10 => StatusCode::GetGraphDataException,
            11 => StatusCode::NoData,
            12 => StatusCode::DeviceWentOffline,
            13 => StatusCode::ServerException,
            14 => StatusCode::NtfInvalidBody,
            15 => StatusCode::NtfNotAuthorized,
            16 => StatusCode::NtfException,
            17 => StatusCode::Timeout,
            18 => StatusCode::NoLoginTimeout,
            19 => StatusCode::InvalidCommandFormat,
            other => StatusCode::Other(other),
        }
    }
}

impl From<StatusCode> for u16 {
    fn from(status: StatusCode) -> Self {
        status.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}
