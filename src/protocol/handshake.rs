//! RTMP server-side handshake
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |                                        |
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |                                        |
//!   |------- C2 (1536 bytes: echo S1) ----->|
//!   |                                        |
//!   |          [Handshake Complete]          |
//! ```
//!
//! Simple handshake only (no HMAC digest). C2 must echo the random bytes
//! of our S1; a mismatch fails the handshake and there is no retry.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Waiting for the client's C0+C1
    AwaitingC0C1,
    /// S0S1S2 sent, waiting for C2
    AwaitingC2,
    /// Handshake complete
    Done,
}

/// Server-side handshake state machine
///
/// Feed received bytes to [`process`](ServerHandshake::process); any
/// returned bytes must be written back to the client.
#[derive(Debug)]
pub struct ServerHandshake {
    state: HandshakeState,
    /// Our S1 packet, kept to verify the C2 echo
    s1: Option<[u8; HANDSHAKE_SIZE]>,
}

impl ServerHandshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::AwaitingC0C1,
            s1: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Bytes required before the next transition can happen
    pub fn bytes_needed(&self) -> usize {
        match self.state {
            HandshakeState::AwaitingC0C1 => 1 + HANDSHAKE_SIZE,
            HandshakeState::AwaitingC2 => HANDSHAKE_SIZE,
            HandshakeState::Done => 0,
        }
    }

    /// Advance the handshake with buffered input.
    ///
    /// Consumes input only when a full packet is available, so it can be
    /// called again as more bytes arrive. Returns the server's response
    /// bytes when a transition produces any.
    pub fn process(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.state {
            HandshakeState::AwaitingC0C1 => {
                if buf.len() < 1 + HANDSHAKE_SIZE {
                    return Ok(None);
                }

                let version = buf.get_u8();
                // Some encoders send values above 3; only refuse the
                // pre-RTMP versions.
                if version < RTMP_VERSION {
                    return Err(HandshakeError::InvalidVersion(version).into());
                }

                let mut c1 = [0u8; HANDSHAKE_SIZE];
                buf.copy_to_slice(&mut c1);

                let mut response = BytesMut::with_capacity(1 + HANDSHAKE_SIZE * 2);
                response.put_u8(RTMP_VERSION);

                let s1 = generate_packet();
                self.s1 = Some(s1);
                response.put_slice(&s1);
                response.put_slice(&generate_echo(&c1));

                self.state = HandshakeState::AwaitingC2;
                Ok(Some(response.freeze()))
            }
            HandshakeState::AwaitingC2 => {
                if buf.len() < HANDSHAKE_SIZE {
                    return Ok(None);
                }

                let mut c2 = [0u8; HANDSHAKE_SIZE];
                buf.copy_to_slice(&mut c2);

                // C2 must carry back S1's random bytes. Bytes 4-7 hold the
                // client's read timestamp and are not compared.
                let s1 = self.s1.as_ref().ok_or(HandshakeError::EchoMismatch)?;
                if c2[0..4] != s1[0..4] || c2[8..] != s1[8..] {
                    return Err(HandshakeError::EchoMismatch.into());
                }

                self.state = HandshakeState::Done;
                Ok(None)
            }
            HandshakeState::Done => Ok(None),
        }
    }
}

impl Default for ServerHandshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate an S1 packet: timestamp, zero field, 1528 random bytes.
///
/// The random fill uses an LCG seeded with the clock. Not cryptographic,
/// which the simple handshake does not require.
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0);

    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());
    packet[4..8].copy_from_slice(&[0, 0, 0, 0]);

    let mut seed = timestamp as u64 | 1;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = seed.to_le_bytes();
        let len = chunk.len().min(8);
        chunk[..len].copy_from_slice(&bytes[..len]);
    }

    packet
}

/// Generate S2: the peer's C1 with our receive timestamp in bytes 4-7.
fn generate_echo(peer_packet: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer_packet;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0);

    echo[4..8].copy_from_slice(&timestamp.to_be_bytes());

    echo
}
