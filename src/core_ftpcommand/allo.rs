use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the ALLO FTP command (noop; storage is never pre-allocated).
pub fn handle_allo_command(session: &mut FtpSession, reactor: &mut Reactor) {
    session.respond(reactor, "202 No storage allocation necessary.");
}
