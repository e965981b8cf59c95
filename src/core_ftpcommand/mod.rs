pub mod abor;
pub mod allo;
pub mod auth;
pub mod cdup;
pub mod cwd;
pub mod dele;
pub mod feat;
pub mod handlers;
pub mod help;
pub mod list;
pub mod mdtm;
pub mod mkd;
pub mod mlsd;
pub mod mlst;
pub mod mode;
pub mod nlst;
pub mod noop;
pub mod opts;
pub mod pass;
pub mod pwd;
pub mod quit;
pub mod rein;
pub mod rest;
pub mod retr;
pub mod rmd;
pub mod rnfr;
pub mod rnto;
pub mod site;
pub mod size;
pub mod stat;
pub mod stor;
pub mod stou;
pub mod stru;
pub mod syst;
pub mod type_;
pub mod user;

use std::path::PathBuf;

use crate::core_network::{pasv, port};
use crate::core_reactor::Reactor;
use crate::session::FtpSession;

/// Route a validated command to its handler. Pre-dispatch checks
/// (arity, authentication, path jail, permissions) have already run.
pub fn dispatch_command(
    session: &mut FtpSession,
    reactor: &mut Reactor,
    cmd: &str,
    arg: &str,
    path: Option<PathBuf>,
) {
    match cmd {
        "USER" => user::handle_user_command(session, reactor, arg),
        "PASS" => pass::handle_pass_command(session, reactor, arg),
        "REIN" => rein::handle_rein_command(session, reactor),
        "QUIT" => quit::handle_quit_command(session, reactor),
        "NOOP" => noop::handle_noop_command(session, reactor),
        "HELP" => help::handle_help_command(session, reactor, arg),
        "SYST" => syst::handle_syst_command(session, reactor),
        "FEAT" => feat::handle_feat_command(session, reactor),
        "OPTS" => opts::handle_opts_command(session, reactor, arg),
        "STAT" => stat::handle_stat_command(session, reactor, arg, path),
        "ALLO" => allo::handle_allo_command(session, reactor),

        "TYPE" => type_::handle_type_command(session, reactor, arg),
        "STRU" => stru::handle_stru_command(session, reactor, arg),
        "MODE" => mode::handle_mode_command(session, reactor, arg),

        "PORT" => {
            if session.epsv_all {
                session.respond(reactor, "501 PORT not allowed after EPSV ALL.");
            } else {
                port::handle_port_command(session, reactor, arg)
            }
        }
        "EPRT" => {
            if session.epsv_all {
                session.respond(reactor, "501 EPRT not allowed after EPSV ALL.");
            } else {
                port::handle_eprt_command(session, reactor, arg)
            }
        }
        "PASV" => {
            if session.epsv_all {
                session.respond(reactor, "501 PASV not allowed after EPSV ALL.");
            } else {
                pasv::handle_pasv_command(session, reactor, false)
            }
        }
        "EPSV" => handle_epsv(session, reactor, arg),

        "LIST" => list::handle_list_command(session, reactor, path),
        "NLST" => nlst::handle_nlst_command(session, reactor, path),
        "MLSD" => mlsd::handle_mlsd_command(session, reactor, path),
        "MLST" => mlst::handle_mlst_command(session, reactor, path),
        "SIZE" => size::handle_size_command(session, reactor, path),
        "MDTM" => mdtm::handle_mdtm_command(session, reactor, arg, path),

        "CWD" | "XCWD" => cwd::handle_cwd_command(session, reactor, path),
        "CDUP" | "XCUP" => cdup::handle_cdup_command(session, reactor, path),
        "PWD" | "XPWD" => pwd::handle_pwd_command(session, reactor),
        "MKD" | "XMKD" => mkd::handle_mkd_command(session, reactor, path),
        "RMD" | "XRMD" => rmd::handle_rmd_command(session, reactor, path),
        "DELE" => dele::handle_dele_command(session, reactor, path),
        "RNFR" => rnfr::handle_rnfr_command(session, reactor, path),
        "RNTO" => rnto::handle_rnto_command(session, reactor, path),

        "RETR" => retr::handle_retr_command(session, reactor, path),
        "STOR" => stor::handle_stor_command(session, reactor, path, false),
        "APPE" => stor::handle_appe_command(session, reactor, path),
        "STOU" => stou::handle_stou_command(session, reactor, arg),
        "ABOR" => abor::handle_abor_command(session, reactor),
        "REST" => rest::handle_rest_command(session, reactor, arg),

        "SITE CHMOD" => site::site_chmod::handle_site_chmod_command(session, reactor, arg),
        "SITE MFMT" => site::site_mfmt::handle_site_mfmt_command(session, reactor, arg),
        "SITE HELP" => site::site_help::handle_site_help_command(session, reactor, arg),
        "SITE" => session.respond(reactor, "500 SITE command not understood."),

        "AUTH" => auth::handle_auth_command(session, reactor, arg),
        "PBSZ" => auth::handle_pbsz_command(session, reactor, arg),
        "PROT" => auth::handle_prot_command(session, reactor, arg),
        "CCC" => auth::handle_ccc_command(session, reactor),

        other => {
            session.respond(reactor, &format!("500 Command \"{}\" not understood.", other));
        }
    }
}

fn handle_epsv(session: &mut FtpSession, reactor: &mut Reactor, arg: &str) {
    match arg {
        "" => pasv::handle_pasv_command(session, reactor, true),
        "1" => {
            if session.remote_addr.is_ipv4() {
                pasv::handle_pasv_command(session, reactor, true)
            } else {
                session.respond(reactor, "522 Network protocol not supported (use 2).");
            }
        }
        "2" => {
            if session.remote_addr.is_ipv4() {
                session.respond(reactor, "522 Network protocol not supported (use 1).");
            } else {
                pasv::handle_pasv_command(session, reactor, true)
            }
        }
        other if other.eq_ignore_ascii_case("all") => {
            session.epsv_all = true;
            session.respond(reactor, "220 Other commands other than EPSV are now disabled.");
        }
        _ => {
            if session.remote_addr.is_ipv4() {
                session.respond(reactor, "501 Unknown network protocol (use 1).");
            } else {
                session.respond(reactor, "501 Unknown network protocol (use 2).");
            }
        }
    }
}
