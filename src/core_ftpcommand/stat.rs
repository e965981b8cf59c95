use std::path::PathBuf;

use crate::core_reactor::Reactor;
use crate::core_transfer::producer::Producer;
use crate::core_vfs::{listing, strerror};
use crate::session::{FtpSession, TransferType};

/// Handles the STAT FTP command.
///
/// Without an argument it reports session status over the control
/// channel. With a path it sends the directory listing over the
/// control channel (213 multi-line), which lets clients inspect
/// directories without opening a data connection. Globbing is not
/// supported.
pub fn handle_stat_command(
    session: &mut FtpSession,
    reactor: &mut Reactor,
    arg: &str,
    path: Option<PathBuf>,
) {
    if arg.is_empty() {
        status_reply(session, reactor);
        return;
    }

    if arg.contains('*') || arg.contains('?') || arg.contains('[') {
        session.respond(reactor, "550 Globbing not supported.");
        return;
    }

    let path = match path {
        Some(path) => path,
        None => return session.respond(reactor, "550 Invalid path."),
    };
    let (line, names_result, basedir) = {
        let fs = match session.fs.as_ref() {
            Some(fs) => fs,
            None => return session.respond(reactor, "503 Login with USER and PASS first."),
        };
        let line = fs.fs2ftp(&path);
        if fs.isdir(&path) {
            (line, fs.listdir(&path), path.clone())
        } else {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let parent = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
            match fs.lstat(&path) {
                Ok(_) => (line, Ok(vec![name]), parent),
                Err(err) => (line, Err(err), parent),
            }
        }
    };

    match names_result {
        Ok(names) => {
            session.log_fs_cmd("STAT", &path, 213, "Directory listed");
            session.push_text(&format!("213-Status of \"{}\":\r\n", line));
            let iter = listing::format_list(&basedir, names, session.server.config.use_gmt_times);
            let mut producer = crate::core_transfer::IteratorProducer::new(iter);
            // the listing goes over the control channel; pull it eagerly
            // in bounded chunks
            loop {
                match producer.more() {
                    Ok(chunk) if chunk.is_empty() => break,
                    Ok(chunk) => session.push_text(&String::from_utf8_lossy(&chunk)),
                    Err(_) => break,
                }
            }
            session.respond(reactor, "213 End of status.");
        }
        Err(err) => {
            let why = strerror(&err);
            session.log_fs_cmd("STAT", &path, 550, &why);
            session.respond(reactor, &format!("550 {}.", why));
        }
    }
}

fn status_reply(session: &mut FtpSession, reactor: &mut Reactor) {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!(
        "Connected to: {}:{}",
        session.local_addr.ip(),
        session.local_addr.port()
    ));
    if session.authenticated {
        lines.push(format!("Logged in as: {}", session.username));
    } else if session.username.is_empty() {
        lines.push(String::from("Waiting for username."));
    } else {
        lines.push(String::from("Waiting for password."));
    }
    let type_name = match session.transfer_type {
        TransferType::Ascii => "ASCII",
        TransferType::Binary => "Binary",
    };
    lines.push(format!(
        "TYPE: {}; STRUcture: File; MODE: Stream",
        type_name
    ));
    if session.dtp_acceptor.is_some() {
        lines.push(String::from("Passive data channel waiting for connection."));
    } else if let Some(data) = session.data_channel.as_ref() {
        let data = data.borrow();
        lines.push(String::from("Data connection open:"));
        lines.push(format!("Total bytes sent: {}", data.bytes_sent()));
        lines.push(format!("Total bytes received: {}", data.bytes_received()));
        lines.push(format!(
            "Transfer elapsed time: {:.3} secs",
            data.elapsed()
        ));
    } else {
        lines.push(String::from("Data connection closed."));
    }

    session.push_text("211-FTP server status:\r\n");
    for line in &lines {
        session.push_text(&format!(" {}\r\n", line));
    }
    session.respond(reactor, "211 End of status.");
}
