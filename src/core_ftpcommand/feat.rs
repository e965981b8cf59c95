use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Handles the FEAT FTP command (RFC-2389): advertise the extensions
/// this server implements. MLST facts enabled by default are starred.
pub fn handle_feat_command(session: &mut FtpSession, reactor: &mut Reactor) {
    let mut features: Vec<String> = vec![
        "EPRT".into(),
        "EPSV".into(),
        "MDTM".into(),
        "MLSD".into(),
        "REST STREAM".into(),
        "SIZE".into(),
        "TVFS".into(),
        "UTF8".into(),
    ];
    if session.server.tls.is_some() {
        features.push("AUTH TLS".into());
        features.push("AUTH SSL".into());
        features.push("PBSZ".into());
        features.push("PROT".into());
    }

    let mut facts_line = String::from("MLST ");
    for fact in &session.available_facts {
        facts_line.push_str(fact);
        if session.current_facts.contains(fact) {
            facts_line.push('*');
        }
        facts_line.push(';');
    }
    features.push(facts_line);
    features.sort();

    session.push_text("211-Features supported:\r\n");
    for feature in &features {
        session.push_text(&format!(" {}\r\n", feature));
    }
    session.respond(reactor, "211 End FEAT.");
}
