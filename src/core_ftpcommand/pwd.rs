use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the PWD FTP command.
///
/// The 257 reply double-quotes the path, doubling any embedded quote
/// (RFC-959, appendix II).
pub fn handle_pwd_command(session: &mut FtpSession, reactor: &mut Reactor) {
    let cwd = session
        .fs
        .as_ref()
        .map(|fs| fs.cwd().to_string())
        .unwrap_or_else(|| String::from("/"));
    session.respond(
        reactor,
        &format!("257 \"{}\" is the current directory.", quote_path(&cwd)),
    );
}

pub(crate) fn quote_path(path: &str) -> String {
    path.replace('"', "\"\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_quotes_are_doubled() {
        assert_eq!(quote_path("/plain"), "/plain");
        assert_eq!(quote_path("/odd\"name"), "/odd\"\"name");
    }
}
