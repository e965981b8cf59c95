use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the OPTS FTP command (RFC-2389).
///
/// `OPTS UTF8 ON|OFF` is accepted as a no-op (pathnames are always
/// UTF-8); `OPTS MLST <fact;fact;...>` reconfigures the session's MLSD
/// fact set.
pub fn handle_opts_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    let mut parts = arg.splitn(2, ' ');
    let cmd = parts.next().unwrap_or("").to_ascii_uppercase();
    let options = parts.next().unwrap_or("");

    match cmd.as_str() {
        "UTF8" => match options.to_ascii_uppercase().as_str() {
            "ON" | "OFF" | "" => session.respond(reactor, "200 UTF8 option accepted."),
            _ => session.respond(reactor, "501 Invalid UTF8 option."),
        },
        "MLST" => {
            if !options.is_empty() && !options.contains(';') {
                session.respond(reactor, "501 Invalid argument.");
                return;
            }
            let requested: Vec<String> = options
                .split(';')
                .map(|fact| fact.trim().to_ascii_lowercase())
                .filter(|fact| !fact.is_empty())
                .collect();
            session.current_facts = session
                .available_facts
                .iter()
                .filter(|fact| requested.contains(*fact))
                .cloned()
                .collect();
            let enabled: String = session
                .current_facts
                .iter()
                .map(|fact| format!("{};", fact))
                .collect();
            session.respond(reactor, &format!("200 MLST OPTS {}", enabled));
        }
        _ => session.respond(reactor, &format!("501 Unsupported command \"{}\".", cmd)),
    }
}
