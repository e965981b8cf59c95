use crate::constants::MAX_SINGLE_LINE_REPLY;
use crate::core_reactor::Reactor;
use crate::core_vfs::VirtualFs;
use crate::session::FtpSession;

/// Handles the PASS FTP command.
///
/// On success the virtual filesystem is rooted at the user's home
/// directory and the login callback fires. On failure the 530 reply is
/// delayed by `auth_failed_timeout` (scheduled on the reactor, never a
/// blocking sleep) and the session disconnects after
/// `max_login_attempts` failures.
pub fn handle_pass_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    if session.authenticated {
        session.respond(reactor, "503 User already authenticated.");
        return;
    }
    if session.username.is_empty() {
        session.respond(reactor, "503 Login with USER first.");
        return;
    }

    let username = session.username.clone();
    match session
        .server
        .authorizer
        .validate_authentication(&username, arg)
    {
        Ok(()) => {
            let home = match session.server.authorizer.get_home_dir(&username) {
                Some(home) => home,
                None => {
                    session.respond(reactor, "530 Authentication failed.");
                    return;
                }
            };
            let msg_login = session.server.authorizer.get_msg_login(&username);
            if msg_login.len() <= MAX_SINGLE_LINE_REPLY {
                session.respond(reactor, &format!("230 {}", msg_login));
            } else {
                session.respond_multiline(reactor, 230, &msg_login);
            }
            session.authenticated = true;
            session.password = arg.to_string();
            session.attempted_logins = 0;
            session.fs = Some(VirtualFs::new(home));
            session.log(&format!("User {:?} logged in.", username));
            session.server.callbacks.on_login(&username);
        }
        Err(failure) => {
            session.username.clear();
            session.server.callbacks.on_login_failed(&username, arg);
            session.delay_auth_failure(reactor, failure.message);
        }
    }
}
