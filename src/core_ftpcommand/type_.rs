use crate::core_reactor::Reactor;
use crate::session::{FtpSession, TransferType};

/// Handles the TYPE FTP command.
///
/// `A` and `L 7` select ASCII, `I` and `L 8` select binary; anything
/// else (including the historical `AN` spelling) is rejected with 504.
pub fn handle_type_command(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    let normalized: String = arg.to_ascii_uppercase().split_whitespace().collect();
    match normalized.as_str() {
        "A" | "L7" => {
            session.transfer_type = TransferType::Ascii;
            session.respond(reactor, "200 Type set to: ASCII.");
        }
        "I" | "L8" => {
            session.transfer_type = TransferType::Binary;
            session.respond(reactor, "200 Type set to: Binary.");
        }
        _ => {
            session.respond(reactor, &format!("504 Unsupported type \"{}\".", arg));
        }
    }
}
