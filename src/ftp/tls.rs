//! FTPS inline TLS engine: an explicit handshake state
//! machine driven from the command loop's own read/write points,
//! rather than an opaque async TLS stream, so the 234 pre-handshake
//! reply and the PROT/PBSZ negotiation can stay on the plaintext path
//! until the caller decides to switch.

use std::sync::Arc;

use rustls::{ServerConfig, ServerConnection};

use crate::error::EngineError;

/// Mirrors the handshake states an `SSLEngine`-style inline TLS wrapper
/// cycles through: unwrap incoming bytes, wrap outgoing bytes, run a
/// delegated (blocking) task, or settle into steady state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    NeedUnwrap,
    NeedWrap,
    NeedTask,
    NotHandshaking,
    Finished,
}

/// Wraps a `rustls::ServerConnection`, exposing the read/write points
/// the FTP session engine drives directly instead of an async stream
/// abstraction, so the plaintext control-channel state machine can
/// stay in control of framing even once TLS is layered on top.
pub struct TlsEngine {
    conn: ServerConnection,
}

impl TlsEngine {
    pub fn new(config: Arc<ServerConfig>) -> Result<Self, EngineError> {
        let conn = ServerConnection::new(config)
            .map_err(|e| EngineError::Fatal(format!("tls init: {e}")))?;
        Ok(TlsEngine { conn })
    }

    pub fn status(&self) -> HandshakeStatus {
        if self.conn.is_handshaking() {
            if self.conn.wants_write() {
                HandshakeStatus::NeedWrap
            } else if self.conn.wants_read() {
                HandshakeStatus::NeedUnwrap
            } else {
                HandshakeStatus::NeedTask
            }
        } else {
            HandshakeStatus::NotHandshaking
        }
    }

    /// Feeds ciphertext read from the socket into the engine, draining
    /// any decrypted plaintext it yields.
    pub fn unwrap_read(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, EngineError> {
        let mut cursor = std::io::Cursor::new(ciphertext);
        self.conn
            .read_tls(&mut cursor)
            .map_err(|e| EngineError::ProtocolViolation(e.to_string()))?;
        self.conn
            .process_new_packets()
            .map_err(|e| EngineError::ProtocolViolation(e.to_string()))?;
        let mut plaintext = Vec::new();
        use std::io::Read;
        let _ = self.conn.reader().read_to_end(&mut plaintext);
        Ok(plaintext)
    }

    /// Wraps plaintext for the wire; returns ciphertext ready to write.
    pub fn wrap_write(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
        use std::io::Write;
        self.conn
            .writer()
            .write_all(plaintext)
            .map_err(|e| EngineError::Fatal(e.to_string()))?;
        let mut out = Vec::new();
        self.conn
            .write_tls(&mut out)
            .map_err(|e| EngineError::Fatal(e.to_string()))?;
        Ok(out)
    }

    /// Drains any pending outbound handshake bytes without wrapping
    /// new plaintext (the `NEED_WRAP` step of the state machine).
    pub fn drain_handshake_output(&mut self) -> Result<Vec<u8>, EngineError> {
        let mut out = Vec::new();
        self.conn
            .write_tls(&mut out)
            .map_err(|e| EngineError::Fatal(e.to_string()))?;
        Ok(out)
    }
}
