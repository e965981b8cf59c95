use std::path::PathBuf;

use crate::core_ftpcommand::cwd::handle_cwd_command;
use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the CDUP FTP command; same reply codes as CWD.
pub fn handle_cdup_command(session: &mut FtpSession, reactor: &mut Reactor, path: Option<PathBuf>) {
    handle_cwd_command(session, reactor, path);
}
