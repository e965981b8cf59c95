//! End-to-end exercises against a live server on the loopback
//! interface: login, directory commands, passive-mode transfers, REST
//! resume and the path jail.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ferroftpd::config::FtpdConfig;
use ferroftpd::core_auth::VirtualAuthorizer;
use ferroftpd::server::{ConcurrencyModel, FtpServer};

struct Client {
    reader: BufReader<TcpStream>,
    stream: TcpStream,
}

impl Client {
    fn connect(addr: std::net::SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).expect("connect control");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        Client { reader, stream }
    }

    fn reply(&mut self) -> String {
        let mut line = String::new();
        loop {
            line.clear();
            self.reader.read_line(&mut line).expect("read reply");
            assert!(!line.is_empty(), "server closed the control connection");
            // skip intermediate lines of multi-line replies
            let bytes = line.as_bytes();
            if bytes.len() >= 4
                && bytes[..3].iter().all(|b| b.is_ascii_digit())
                && bytes[3] == b' '
            {
                return line.trim_end().to_string();
            }
        }
    }

    fn cmd(&mut self, command: &str) -> String {
        self.stream
            .write_all(format!("{}\r\n", command).as_bytes())
            .expect("send command");
        self.reply()
    }

    fn login(&mut self) {
        let reply = self.cmd("USER anonymous");
        assert!(reply.starts_with("331"), "{reply}");
        let reply = self.cmd("PASS guest@example.com");
        assert!(reply.starts_with("230"), "{reply}");
        let reply = self.cmd("TYPE I");
        assert!(reply.starts_with("200"), "{reply}");
    }

    /// Issue PASV and open the advertised data connection.
    fn pasv_data_socket(&mut self) -> TcpStream {
        let reply = self.cmd("PASV");
        assert!(reply.starts_with("227"), "{reply}");
        let open = reply.find('(').expect("PASV reply format");
        let close = reply.rfind(')').expect("PASV reply format");
        let numbers: Vec<u16> = reply[open + 1..close]
            .split(',')
            .map(|piece| piece.trim().parse().unwrap())
            .collect();
        assert_eq!(numbers.len(), 6, "{reply}");
        let ip = format!(
            "{}.{}.{}.{}",
            numbers[0], numbers[1], numbers[2], numbers[3]
        );
        let port = numbers[4] * 256 + numbers[5];
        let sock = TcpStream::connect((ip.as_str(), port)).expect("connect data");
        sock.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        sock
    }
}

fn start_server(root: &Path, write_access: bool) -> std::net::SocketAddr {
    let mut authorizer = VirtualAuthorizer::new();
    let perm = if write_access { "elradfmwMT" } else { "elr" };
    authorizer.add_anonymous(root, perm).unwrap();

    let config = FtpdConfig {
        timeout: 60,
        data_timeout: 60,
        auth_failed_timeout: 0.1,
        ..FtpdConfig::default()
    };
    let server = FtpServer::new(config, Arc::new(authorizer)).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let _ = server.serve_on(listener, ConcurrencyModel::Async);
    });
    // give the reactor a moment to come up
    std::thread::sleep(Duration::from_millis(100));
    addr
}

#[test]
fn login_and_directory_commands() {
    let root = tempfile::tempdir().unwrap();
    let addr = start_server(root.path(), true);

    let mut client = Client::connect(addr);
    let greeting = client.reply();
    assert!(greeting.starts_with("220"), "{greeting}");

    client.login();

    let reply = client.cmd("PWD");
    assert!(reply.starts_with("257 \"/\""), "{reply}");

    let reply = client.cmd("MKD incoming");
    assert!(reply.starts_with("257"), "{reply}");
    assert!(root.path().join("incoming").is_dir());

    let reply = client.cmd("CWD incoming");
    assert!(reply.starts_with("250"), "{reply}");
    let reply = client.cmd("PWD");
    assert!(reply.contains("\"/incoming\""), "{reply}");

    let reply = client.cmd("CDUP");
    assert!(reply.starts_with("250"), "{reply}");

    let reply = client.cmd("RMD incoming");
    assert!(reply.starts_with("250"), "{reply}");
    assert!(!root.path().join("incoming").exists());

    let reply = client.cmd("NOOP");
    assert!(reply.starts_with("200"), "{reply}");
    let reply = client.cmd("SYST");
    assert!(reply.starts_with("215 UNIX"), "{reply}");

    let reply = client.cmd("QUIT");
    assert!(reply.starts_with("221"), "{reply}");
}

#[test]
fn store_and_retrieve_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let addr = start_server(root.path(), true);

    let mut client = Client::connect(addr);
    client.reply();
    client.login();

    // deterministic pseudo-random payload
    let payload: Vec<u8> = (0..100_003u32)
        .map(|i| (i.wrapping_mul(2654435761) >> 7) as u8)
        .collect();

    let mut data = client.pasv_data_socket();
    let reply = client.cmd("STOR blob.bin");
    assert!(reply.starts_with('1'), "{reply}");
    data.write_all(&payload).unwrap();
    drop(data);
    let reply = client.reply();
    assert!(reply.starts_with("226"), "{reply}");

    let reply = client.cmd("SIZE blob.bin");
    assert_eq!(reply, format!("213 {}", payload.len()));

    let mut data = client.pasv_data_socket();
    let reply = client.cmd("RETR blob.bin");
    assert!(reply.starts_with('1'), "{reply}");
    let mut fetched = Vec::new();
    data.read_to_end(&mut fetched).unwrap();
    let reply = client.reply();
    assert!(reply.starts_with("226"), "{reply}");
    assert_eq!(fetched, payload);

    let reply = client.cmd("DELE blob.bin");
    assert!(reply.starts_with("250"), "{reply}");
}

#[test]
fn rest_resumes_an_upload() {
    let root = tempfile::tempdir().unwrap();
    let addr = start_server(root.path(), true);

    let mut client = Client::connect(addr);
    client.reply();
    client.login();

    let first: Vec<u8> = vec![0xAA; 4096];
    let tail: Vec<u8> = vec![0x55; 2048];

    let mut data = client.pasv_data_socket();
    let reply = client.cmd("STOR resume.bin");
    assert!(reply.starts_with('1'), "{reply}");
    data.write_all(&first).unwrap();
    drop(data);
    let reply = client.reply();
    assert!(reply.starts_with("226"), "{reply}");

    let reply = client.cmd("REST 2048");
    assert!(reply.starts_with("350"), "{reply}");

    let mut data = client.pasv_data_socket();
    let reply = client.cmd("STOR resume.bin");
    assert!(reply.starts_with('1'), "{reply}");
    data.write_all(&tail).unwrap();
    drop(data);
    let reply = client.reply();
    assert!(reply.starts_with("226"), "{reply}");

    let stored = std::fs::read(root.path().join("resume.bin")).unwrap();
    assert_eq!(stored.len(), 4096);
    assert_eq!(&stored[..2048], &first[..2048]);
    assert_eq!(&stored[2048..], &tail[..]);
}

#[test]
fn path_escapes_are_refused() {
    let root = tempfile::tempdir().unwrap();
    let addr = start_server(root.path(), false);

    let mut client = Client::connect(addr);
    client.reply();
    client.login();

    // "/etc" resolves inside the jail where it does not exist
    let reply = client.cmd("CWD /etc");
    assert!(reply.starts_with("550"), "{reply}");

    let _data = client.pasv_data_socket();
    let reply = client.cmd("RETR ../../etc/passwd");
    assert!(reply.starts_with("550"), "{reply}");

    let reply = client.cmd("PWD");
    assert!(reply.contains("\"/\""), "{reply}");
}

#[test]
fn rename_sequence() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("old.txt"), b"payload").unwrap();
    let addr = start_server(root.path(), true);

    let mut client = Client::connect(addr);
    client.reply();
    client.login();

    // RNTO without RNFR is a sequence error
    let reply = client.cmd("RNTO new.txt");
    assert!(reply.starts_with("503"), "{reply}");

    let reply = client.cmd("RNFR old.txt");
    assert!(reply.starts_with("350"), "{reply}");
    let reply = client.cmd("RNTO new.txt");
    assert!(reply.starts_with("250"), "{reply}");
    assert!(root.path().join("new.txt").exists());
    assert!(!root.path().join("old.txt").exists());

    // any command other than RNTO clears a pending rename
    let reply = client.cmd("RNFR new.txt");
    assert!(reply.starts_with("350"), "{reply}");
    let reply = client.cmd("NOOP");
    assert!(reply.starts_with("200"), "{reply}");
    let reply = client.cmd("RNTO other.txt");
    assert!(reply.starts_with("503"), "{reply}");
}

#[test]
fn write_commands_require_permission() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("readable.txt"), b"data").unwrap();
    let addr = start_server(root.path(), false); // read-only anonymous

    let mut client = Client::connect(addr);
    client.reply();
    client.login();

    let reply = client.cmd("MKD dir");
    assert!(reply.starts_with("550"), "{reply}");
    let reply = client.cmd("DELE readable.txt");
    assert!(reply.starts_with("550"), "{reply}");
    assert!(root.path().join("readable.txt").exists());

    let _data = client.pasv_data_socket();
    let reply = client.cmd("STOR upload.txt");
    assert!(reply.starts_with("550"), "{reply}");
}

#[test]
fn abor_without_transfer_and_feat() {
    let root = tempfile::tempdir().unwrap();
    let addr = start_server(root.path(), false);

    let mut client = Client::connect(addr);
    client.reply();
    client.login();

    let reply = client.cmd("ABOR");
    assert!(reply.starts_with("225"), "{reply}");

    let reply = client.cmd("FEAT");
    assert!(reply.starts_with("211"), "{reply}");

    let reply = client.cmd("HELP");
    assert!(reply.starts_with("214"), "{reply}");

    // SIZE under ASCII type is refused by design
    let reply = client.cmd("TYPE A");
    assert!(reply.starts_with("200"), "{reply}");
    let reply = client.cmd("SIZE whatever");
    assert!(reply.starts_with("550"), "{reply}");
}

#[test]
fn bad_password_is_delayed_then_rejected() {
    let root = tempfile::tempdir().unwrap();

    let mut authorizer = VirtualAuthorizer::new();
    authorizer.add_user("joe", "secret", root.path(), "elr").unwrap();
    let config = FtpdConfig {
        auth_failed_timeout: 0.2,
        ..FtpdConfig::default()
    };
    let server = FtpServer::new(config, Arc::new(authorizer)).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let _ = server.serve_on(listener, ConcurrencyModel::Async);
    });
    std::thread::sleep(Duration::from_millis(100));

    let mut client = Client::connect(addr);
    client.reply();

    let reply = client.cmd("USER joe");
    assert!(reply.starts_with("331"), "{reply}");

    let started = std::time::Instant::now();
    let reply = client.cmd("PASS wrong");
    assert!(reply.starts_with("530"), "{reply}");
    assert!(
        started.elapsed() >= Duration::from_millis(180),
        "530 came back without the auth-failure delay"
    );

    let reply = client.cmd("USER joe");
    assert!(reply.starts_with("331"), "{reply}");
    let reply = client.cmd("PASS secret");
    assert!(reply.starts_with("230"), "{reply}");
}
