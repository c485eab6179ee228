//! The SMB parser/dialect boundary. This module only gives
//! that boundary a concrete Rust shape; a real wire codec is a
//! collaborator crate, the same way [`crate::vfs::DiskInterface`] is.

use async_trait::async_trait;

use crate::auth::ClientInfo;
use crate::error::EngineError;
use crate::share::TreeConnection;
use crate::smb::status::NtStatus;

/// One SMB request as framed off the wire, already stripped of any
/// NetBIOS/direct-TCP transport framing.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub command: u16,
    pub body: Vec<u8>,
    /// True when more requests follow in the same compound packet.
    pub more_compound: bool,
}

/// Dialect list and negotiation options the parser extracted from an
/// `SMB_COM_NEGOTIATE`/`SMB2 NEGOTIATE` request.
#[derive(Debug, Clone)]
pub struct NegotiateContext {
    pub offered_dialects: Vec<String>,
    pub client_guid: [u8; 16],
}

/// A command result the engine hands back to the parser for framing.
pub enum HandlerOutcome {
    Response(Vec<u8>),
    /// The handler wants this response queued for later delivery
    /// rather than sent inline, typically an oplock/lease
    /// break or a CHANGE_NOTIFY completion.
    Async(Vec<u8>),
    Error(NtStatus),
}

/// The negotiated dialect's protocol behavior. One instance per
/// session, allocated by [`crate::smb::session::SmbConnection`]
/// after dialect negotiation.
#[async_trait]
pub trait DialectHandler: Send + Sync {
    fn dialect_name(&self) -> &'static str;

    /// Called once immediately after this handler is selected.
    async fn post_negotiate(&mut self, ctx: &NegotiateContext) -> Result<(), EngineError>;

    /// Packs the negotiate response for `ctx` (parser hook
    /// `packNegotiateResponse`).
    fn pack_negotiate_response(&self, ctx: &NegotiateContext) -> Vec<u8>;

    /// Builds an error response carrying the original request bytes
    /// back (parser hook `buildErrorResponse`).
    fn build_error_response(&self, original: &RawRequest, status: NtStatus) -> Vec<u8>;

    /// Executes one request within an established session/tree context.
    async fn handle(
        &self,
        req: &RawRequest,
        tree: Option<&TreeConnection>,
        client: &ClientInfo,
    ) -> HandlerOutcome;

    /// Parser hook invoked on every outbound response before it is
    /// written to the wire (signing, credit grants, etc. live here in
    /// a real dialect handler; this core only calls the hook).
    fn response_pre_send(&self, response: Vec<u8>) -> Vec<u8> {
        response
    }
}

/// Picks the highest dialect common to `offered` and `enabled`,
/// preserving `enabled`'s configured priority order ("negotiate
/// dialect, common highest").
pub fn negotiate_dialect<'a>(offered: &[String], enabled: &'a [String]) -> Option<&'a str> {
    enabled.iter().rev().find(|d| offered.contains(d)).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_enabled_dialect_present_in_offer() {
        let enabled = vec!["SMB2_002".to_string(), "SMB2_1".to_string(), "SMB3_0".to_string()];
        let offered = vec!["SMB2_002".to_string(), "SMB2_1".to_string()];
        assert_eq!(negotiate_dialect(&offered, &enabled), Some("SMB2_1"));
    }

    #[test]
    fn no_common_dialect_returns_none() {
        let enabled = vec!["SMB3_0".to_string()];
        let offered = vec!["SMB2_002".to_string()];
        assert_eq!(negotiate_dialect(&offered, &enabled), None);
    }
}
