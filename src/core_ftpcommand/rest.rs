use crate::core_reactor::Reactor;
use crate::session::{FtpSession, TransferType};

/// Handles the REST FTP command: record the restart marker for the next
/// RETR or STOR. Resuming in ASCII mode is refused because offsets into
/// translated data are meaningless.
pub fn handle_rest_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    if session.transfer_type == TransferType::Ascii {
        session.respond(reactor, "501 Resuming transfers not allowed in ASCII mode.");
        return;
    }
    match arg.parse::<u64>() {
        Ok(marker) => {
            session.respond(reactor, &format!("350 Restarting at position {}.", marker));
            session.restart_position = marker;
        }
        Err(_) => {
            session.respond(reactor, "501 Invalid parameter.");
        }
    }
}
