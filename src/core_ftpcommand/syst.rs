use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the SYST FTP command.
///
/// Always answers UNIX Type: L8 since listings are emitted in
/// `/bin/ls -lA` format on every platform.
pub fn handle_syst_command(session: &mut FtpSession, reactor: &mut Reactor) {
    session.respond(reactor, "215 UNIX Type: L8");
}
