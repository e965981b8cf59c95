use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the MODE FTP command. Stream mode is the only one supported.
pub fn handle_mode_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    match arg.to_ascii_uppercase().as_str() {
        "S" => session.respond(reactor, "200 Transfer mode set to: S"),
        "B" | "C" => session.respond(reactor, "504 Unimplemented MODE type."),
        _ => session.respond(reactor, "501 Unrecognized MODE type."),
    }
}
