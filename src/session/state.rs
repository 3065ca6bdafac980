//! Per-connection session state machine
//!
//! Every RTMP connection walks the same path: handshake, `connect`,
//! then either `publish` or `play`. The phase gates which commands are
//! legal; anything out of order is a protocol violation that closes
//! the connection.

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// TCP accepted, C0C1/S0S1S2/C2 exchange in progress
    AwaitingHandshake,
    /// Handshake complete, waiting for the connect command
    AwaitingConnect,
    /// Connect accepted, waiting for publish or play
    AwaitingCommand,
    /// Session is a publisher pushing media
    Publishing,
    /// Session is a player receiving media
    Playing,
    /// Connection torn down
    Closed,
}

impl SessionPhase {
    /// connect is only legal right after the handshake
    pub fn can_connect(&self) -> bool {
        *self == SessionPhase::AwaitingConnect
    }

    /// publish/play require connect first and commit the session to a role
    pub fn can_start_stream(&self) -> bool {
        *self == SessionPhase::AwaitingCommand
    }

    /// Media messages are only meaningful from a publisher
    pub fn accepts_media(&self) -> bool {
        *self == SessionPhase::Publishing
    }

    pub fn is_closed(&self) -> bool {
        *self == SessionPhase::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_gating() {
        assert!(!SessionPhase::AwaitingHandshake.can_connect());
        assert!(SessionPhase::AwaitingConnect.can_connect());
        assert!(!SessionPhase::AwaitingCommand.can_connect());

        assert!(!SessionPhase::AwaitingConnect.can_start_stream());
        assert!(SessionPhase::AwaitingCommand.can_start_stream());
        assert!(!SessionPhase::Publishing.can_start_stream());
        assert!(!SessionPhase::Playing.can_start_stream());

        assert!(SessionPhase::Publishing.accepts_media());
        assert!(!SessionPhase::Playing.accepts_media());
        assert!(!SessionPhase::AwaitingCommand.accepts_media());

        assert!(SessionPhase::Closed.is_closed());
    }
}
