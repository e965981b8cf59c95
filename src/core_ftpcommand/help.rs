use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the HELP FTP command: per-command syntax help, or the
/// compact table of recognized commands, eight per row.
pub fn handle_help_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    if !arg.is_empty() {
        let lookup = arg.to_ascii_uppercase();
        match session.server.command_table.get(lookup.as_str()) {
            Some(spec) => {
                let help = spec.help;
                session.respond(reactor, &format!("214 {}", help));
            }
            None => session.respond(reactor, "501 Unrecognized command."),
        }
        return;
    }

    let mut keys: Vec<&str> = session
        .server
        .command_table
        .keys()
        .filter(|cmd| !cmd.starts_with("SITE "))
        .map(|cmd| cmd.as_str())
        .collect();
    keys.sort_unstable();

    let mut body = String::new();
    for row in keys.chunks(8) {
        for cmd in row {
            body.push_str(&format!(" {:<6}", cmd));
        }
        body.push_str("\r\n");
    }

    session.push_text("214-The following commands are recognized:\r\n");
    session.push_text(&body);
    session.respond(reactor, "214 Help command successful.");
}
