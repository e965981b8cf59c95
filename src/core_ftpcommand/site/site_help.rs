use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the SITE HELP command.
pub fn handle_site_help_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    if !arg.is_empty() {
        let lookup = format!("SITE {}", arg.to_ascii_uppercase());
        match session.server.command_table.get(lookup.as_str()) {
            Some(spec) => {
                let help = spec.help;
                session.respond(reactor, &format!("214 {}", help));
            }
            None => session.respond(reactor, "501 Unrecognized SITE command."),
        }
        return;
    }

    let mut subs: Vec<String> = session
        .server
        .command_table
        .keys()
        .filter_map(|cmd| cmd.strip_prefix("SITE ").map(str::to_string))
        .collect();
    subs.sort_unstable();

    session.push_text("214-The following SITE commands are recognized:\r\n");
    for sub in subs {
        session.push_text(&format!(" {}\r\n", sub));
    }
    session.respond(reactor, "214 Help SITE command successful.");
}
