use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the AUTH FTP command (RFC-2228 / RFC-4217): upgrade the
/// control channel to TLS.
///
/// SSL and TLS arguments are equivalent; the protocols self-negotiate,
/// so no distinction is needed at the application layer. The 234 reply
/// goes out in cleartext, then every following byte runs through the
/// TLS session.
pub fn handle_auth_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    let arg = arg.to_ascii_uppercase();
    if session.secured {
        session.respond(reactor, "503 Already using TLS.");
        return;
    }
    if !matches!(arg.as_str(), "TLS" | "TLS-C" | "SSL" | "TLS-P") {
        session.respond(reactor, "502 Unrecognized encryption type (use TLS or SSL).");
        return;
    }
    let config = match session.server.tls.clone() {
        Some(config) => config,
        None => {
            session.respond(reactor, "502 TLS is not configured on this server.");
            return;
        }
    };

    session.respond(reactor, &format!("234 AUTH {} successful.", arg));
    match session.chan.start_tls(config) {
        Ok(()) => {
            session.secured = true;
            session.log("TLS established on control channel.");
        }
        Err(err) => {
            session.log(&format!("TLS upgrade failed: {}", err));
            session.close(reactor);
        }
    }
}

/// Handles the PBSZ FTP command. TLS mandates a protection buffer size
/// of 0; other values are accepted but ignored.
pub fn handle_pbsz_command(session: &mut FtpSession, reactor: &mut Reactor, _arg: &str) {
    if !session.secured {
        session.respond(reactor, "503 PBSZ not allowed on insecure control connection.");
        return;
    }
    session.respond(reactor, "200 PBSZ=0 successful.");
    session.pbsz_done = true;
}

/// Handles the PROT FTP command: select the data-channel protection
/// level. Only Clear and Private are meaningful with TLS.
pub fn handle_prot_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    let arg = arg.to_ascii_uppercase();
    if !session.secured {
        session.respond(reactor, "503 PROT not allowed on insecure control connection.");
        return;
    }
    if !session.pbsz_done {
        session.respond(reactor, "503 You must issue the PBSZ command prior to PROT.");
        return;
    }
    match arg.as_str() {
        "C" => {
            session.prot_private = false;
            session.respond(reactor, "200 Protection set to Clear");
        }
        "P" => {
            session.prot_private = true;
            session.respond(reactor, "200 Protection set to Private");
        }
        "S" | "E" => {
            session.respond(reactor, &format!("521 PROT {} unsupported (use C or P).", arg));
        }
        _ => {
            session.respond(reactor, "502 Unrecognized PROT type (use C or P).");
        }
    }
}

/// Handles the CCC FTP command (RFC-4217): revert the control channel
/// to cleartext after a close-notify exchange. The data-channel
/// protection level is kept.
pub fn handle_ccc_command(session: &mut FtpSession, reactor: &mut Reactor) {
    if !session.secured {
        session.respond(reactor, "533 Control channel is not protected.");
        return;
    }
    session.respond(reactor, "200 Control channel set to cleartext.");
    session.chan.stop_tls();
    session.secured = false;
    session.pbsz_done = false;
    session.log("TLS shut down on control channel.");
    session.update_interest(reactor);
}
