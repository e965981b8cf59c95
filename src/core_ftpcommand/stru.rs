use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the STRU FTP command. File structure is the only one
/// supported; record and page structures are refused like proftpd and
/// wu-ftpd do.
pub fn handle_stru_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    match arg.to_ascii_uppercase().as_str() {
        "F" => session.respond(reactor, "200 File transfer structure set to: F."),
        "P" | "R" => session.respond(reactor, "504 Unimplemented STRU type."),
        _ => session.respond(reactor, "501 Unrecognized STRU type."),
    }
}
