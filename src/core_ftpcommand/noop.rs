use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the NOOP FTP command.
pub fn handle_noop_command(session: &mut FtpSession, reactor: &mut Reactor) {
    session.respond(reactor, "200 I successfully done nothin'.");
}
