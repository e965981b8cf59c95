use crate::constants::MAX_SINGLE_LINE_REPLY;
use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the QUIT FTP command.
///
/// If a transfer is in progress the control connection stays open until
/// it completes (RFC-959); further commands are ignored in the meantime.
pub fn handle_quit_command(session: &mut FtpSession, reactor: &mut Reactor) {
    let msg_quit = if session.authenticated {
        session.server.authorizer.get_msg_quit(&session.username)
    } else {
        String::from("Goodbye.")
    };
    if msg_quit.len() <= MAX_SINGLE_LINE_REPLY {
        session.respond(reactor, &format!("221 {}", msg_quit));
    } else {
        session.respond_multiline(reactor, 221, &msg_quit);
    }

    if !session.username.is_empty() {
        let username = session.username.clone();
        session.server.callbacks.on_logout(&username);
    }

    if session.data_channel.is_some() {
        session.quit_pending = true;
        session.sleeping = true;
        session.update_interest(reactor);
    } else {
        session.shutdown_connecting_dtp(reactor);
        session.close_when_done(reactor);
    }
}
