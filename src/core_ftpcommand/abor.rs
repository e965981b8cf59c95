use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the ABOR FTP command.
///
/// With a transfer in progress the data connection is torn down first,
/// a 426 acknowledges the abnormal termination and 226 confirms the
/// abort itself. A pending (unconnected) passive or active endpoint is
/// simply dropped with 225.
pub fn handle_abor_command(session: &mut FtpSession, reactor: &mut Reactor) {
    let had_endpoint = session.dtp_acceptor.is_some() || session.dtp_connector.is_some();

    if !had_endpoint && session.data_channel.is_none() {
        session.respond(reactor, "225 No transfer to abort.");
        return;
    }

    let mut resp = "225 ABOR command successful; data channel closed.";
    if had_endpoint {
        session.shutdown_connecting_dtp(reactor);
    }

    if let Some(data) = session.data_channel.take() {
        let in_progress = data.borrow().transfer_in_progress();
        data.borrow_mut().abort(reactor);
        if in_progress {
            session.respond(reactor, "426 Connection closed; transfer aborted.");
            session.log("OK ABOR. Transfer aborted, data channel closed.");
            resp = "226 ABOR command successful.";
        } else {
            session.log("OK ABOR. Data channel closed.");
        }
        session.reset_idle_timer(reactor);
    }
    session.respond(reactor, resp);
}
