use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the USER FTP command.
///
/// Per RFC-2577 the reply is always 331 so a malicious client cannot
/// probe for valid usernames; a bad username only surfaces when PASS is
/// rejected. A second USER while logged in flushes the account and
/// restarts the login sequence.
pub fn handle_user_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    if session.authenticated {
        session.flush_account(reactor);
        session.log("Previous account information was flushed.");
        session.respond(
            reactor,
            "331 Previous account information was flushed, send password.",
        );
    } else {
        session.respond(reactor, "331 Username ok, send password.");
    }
    session.username = arg.to_string();
}
