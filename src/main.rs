use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::error;

use ferroftpd::config::FtpdConfig;
use ferroftpd::core_auth::VirtualAuthorizer;
use ferroftpd::core_cli::{Cli, Concurrency};
use ferroftpd::core_log::init_logger;
use ferroftpd::server::{termination_signal, ConcurrencyModel, FtpServer, ServerError};

fn main() {
    let args = Cli::parse();
    init_logger(args.debug);

    match run(args) {
        Ok(()) => {
            // a signal-driven shutdown reports the conventional 130
            if termination_signal().is_some() {
                std::process::exit(130);
            }
        }
        Err(err) => {
            error!("{:#}", err);
            let code = match err.downcast_ref::<ServerError>() {
                Some(ServerError::Bind(_, _)) => 2,
                _ => 1,
            };
            std::process::exit(code);
        }
    }
}

fn run(args: Cli) -> Result<()> {
    let config = build_config(&args)?;
    let authorizer = build_authorizer(&args)?;

    let model = match args.concurrency {
        Concurrency::Async => ConcurrencyModel::Async,
        Concurrency::PreFork => ConcurrencyModel::PreFork(args.workers),
        Concurrency::MultiThread => ConcurrencyModel::ThreadPerConnection,
        Concurrency::MultiProc => ConcurrencyModel::ProcessPerConnection,
    };

    let server = FtpServer::new(config, Arc::new(authorizer))?;
    server.serve(model)?;
    Ok(())
}

fn build_config(args: &Cli) -> Result<FtpdConfig> {
    let mut config = FtpdConfig {
        listen_address: args.interface.clone(),
        listen_port: args.port,
        timeout: args.timeout,
        encoding: args.encoding.clone(),
        use_gmt_times: !args.use_localtime,
        use_sendfile: !args.disable_sendfile,
        max_cons: args.max_cons,
        max_cons_per_ip: args.max_cons_per_ip,
        max_login_attempts: args.max_login_attempts,
        permit_foreign_addresses: args.permit_foreign_addresses,
        permit_privileged_ports: args.permit_privileged_ports,
        ..FtpdConfig::default()
    };
    if let Some(banner) = args.banner.as_ref() {
        config.banner = banner.clone();
    }
    if let Some(nat) = args.nat_address.as_ref() {
        let addr: IpAddr = nat
            .parse()
            .with_context(|| format!("invalid NAT address: {}", nat))?;
        config.masquerade_address = Some(addr);
    }
    if let Some(range) = args.range.as_ref() {
        config.passive_ports = Some(parse_port_range(range)?);
    }

    if args.tls || args.certfile.is_some() {
        if args.certfile.is_none() {
            bail!("--tls requires --certfile");
        }
        config.tls.certfile = args.certfile.clone();
        config.tls.keyfile = args.keyfile.clone();
        config.tls.control_required = args.tls_control_required;
        config.tls.data_required = args.tls_data_required;
    } else if args.tls_control_required || args.tls_data_required {
        bail!("--tls-control-required/--tls-data-required need --tls and --certfile");
    }

    Ok(config)
}

fn build_authorizer(args: &Cli) -> Result<VirtualAuthorizer> {
    let directory = match args.directory.as_ref() {
        Some(directory) => directory.clone(),
        None => std::env::current_dir().context("can't determine current directory")?,
    };
    let anon_perm = if args.write { "elradfmw" } else { "elr" };

    let mut authorizer = VirtualAuthorizer::new();
    authorizer
        .add_anonymous(&directory, anon_perm)
        .context("can't add anonymous user")?;

    match (args.username.as_ref(), args.password.as_ref()) {
        (Some(username), Some(password)) => {
            authorizer
                .add_user(username, password, &directory, "elradfmwMT")
                .with_context(|| format!("can't add user {:?}", username))?;
        }
        (Some(_), None) | (None, Some(_)) => {
            bail!("--username and --password must be given together");
        }
        (None, None) => {}
    }

    Ok(authorizer)
}

fn parse_port_range(range: &str) -> Result<(u16, u16)> {
    let parse = |piece: &str| -> Result<u16> {
        piece
            .trim()
            .parse::<u16>()
            .with_context(|| format!("invalid port: {:?}", piece))
    };
    match range.split_once('-') {
        Some((low, high)) => {
            let low = parse(low)?;
            let high = parse(high)?;
            if low > high {
                bail!("invalid port range: {}", range);
            }
            Ok((low, high))
        }
        None => bail!("invalid port range (expected FROM-TO): {}", range),
    }
}
