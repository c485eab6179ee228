//! FTP verb parsing and dispatch.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::EngineError;
use crate::ftp::data::Mode;
use crate::ftp::path::FtpPath;
use crate::ftp::response::{self, Code};
use crate::ftp::session::{FtpSession, LoginState, ProtLevel};
use crate::ftp::tls::TlsEngine;
use crate::vfs::{OpenMode, PathStatus, SetAttr, SetFileInfo, SetTime, Time};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    User(String),
    Pass(String),
    Quit,
    Type(char),
    Port(SocketAddr),
    Eprt(SocketAddr),
    Pasv,
    Epsv,
    Rest(u64),
    Retr(String),
    Stor(String),
    Appe(String),
    List(Option<String>),
    Nlst(Option<String>),
    Mlsd(Option<String>),
    Mlst(Option<String>),
    Cwd(String),
    Cdup,
    Pwd,
    Mkd(String),
    Rmd(String),
    Dele(String),
    Rnfr(String),
    Rnto(String),
    Size(String),
    Mdtm(String),
    Syst,
    Stat,
    Help,
    Noop,
    Feat,
    Opts(String),
    Abor,
    Auth(String),
    Pbsz(u64),
    Prot(char),
    Ccc,
    Site(String),
    Stru(char),
    Mode(char),
    Allo,
}

pub fn parse(line: &str) -> Option<Verb> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(' ') {
        Some((v, r)) => (v, r.trim()),
        None => (line, ""),
    };
    let verb = verb.to_ascii_uppercase();
    Some(match verb.as_str() {
        "USER" => Verb::User(rest.to_owned()),
        "PASS" => Verb::Pass(rest.to_owned()),
        "QUIT" => Verb::Quit,
        "TYPE" => Verb::Type(rest.chars().next().unwrap_or('A').to_ascii_uppercase()),
        "PORT" => Verb::Port(parse_port_arg(rest)?),
        "EPRT" => Verb::Eprt(parse_eprt_arg(rest)?),
        "PASV" => Verb::Pasv,
        "EPSV" => Verb::Epsv,
        "REST" => Verb::Rest(rest.parse().ok()?),
        "RETR" => Verb::Retr(rest.to_owned()),
        "STOR" => Verb::Stor(rest.to_owned()),
        "APPE" => Verb::Appe(rest.to_owned()),
        "LIST" => Verb::List(none_if_empty(rest)),
        "NLST" => Verb::Nlst(none_if_empty(rest)),
        "MLSD" => Verb::Mlsd(none_if_empty(rest)),
        "MLST" => Verb::Mlst(none_if_empty(rest)),
        "CWD" | "XCWD" => Verb::Cwd(rest.to_owned()),
        "CDUP" | "XCUP" => Verb::Cdup,
        "PWD" | "XPWD" => Verb::Pwd,
        "MKD" | "XMKD" => Verb::Mkd(rest.to_owned()),
        "RMD" | "XRMD" => Verb::Rmd(rest.to_owned()),
        "DELE" => Verb::Dele(rest.to_owned()),
        "RNFR" => Verb::Rnfr(rest.to_owned()),
        "RNTO" => Verb::Rnto(rest.to_owned()),
        "SIZE" => Verb::Size(rest.to_owned()),
        "MDTM" => Verb::Mdtm(rest.to_owned()),
        "SYST" => Verb::Syst,
        "STAT" => Verb::Stat,
        "HELP" => Verb::Help,
        "NOOP" => Verb::Noop,
        "FEAT" => Verb::Feat,
        "OPTS" => Verb::Opts(rest.to_owned()),
        "ABOR" => Verb::Abor,
        "AUTH" => Verb::Auth(rest.to_ascii_uppercase()),
        "PBSZ" => Verb::Pbsz(rest.parse().ok()?),
        "PROT" => Verb::Prot(rest.chars().next().unwrap_or('C').to_ascii_uppercase()),
        "CCC" => Verb::Ccc,
        "SITE" => Verb::Site(rest.to_owned()),
        "STRU" => Verb::Stru(rest.chars().next().unwrap_or('F').to_ascii_uppercase()),
        "MODE" => Verb::Mode(rest.chars().next().unwrap_or('S').to_ascii_uppercase()),
        "ALLO" => Verb::Allo,
        _ => return None,
    })
}

fn none_if_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_owned()) }
}

fn parse_port_arg(rest: &str) -> Option<SocketAddr> {
    let parts: Vec<u16> = rest.split(',').map(|p| p.trim().parse().ok()).collect::<Option<_>>()?;
    if parts.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(parts[0] as u8, parts[1] as u8, parts[2] as u8, parts[3] as u8);
    let port = (parts[4] << 8) | parts[5];
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

fn parse_eprt_arg(rest: &str) -> Option<SocketAddr> {
    let parts: Vec<&str> = rest.split('|').filter(|s| !s.is_empty()).collect();
    if parts.len() != 3 {
        return None;
    }
    let port: u16 = parts[2].parse().ok()?;
    let ip: IpAddr = match parts[0] {
        "1" => IpAddr::V4(parts[1].parse::<Ipv4Addr>().ok()?),
        "2" => IpAddr::V6(parts[1].parse::<Ipv6Addr>().ok()?),
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

pub async fn dispatch(session: &mut FtpSession, verb: Verb) -> Result<(), EngineError> {
    match verb {
        Verb::Quit => unreachable!("handled by the caller"),
        Verb::User(name) => user(session, name).await,
        Verb::Pass(pw) => pass(session, pw).await,
        Verb::Type(t) => type_cmd(session, t).await,
        Verb::Port(addr) => port(session, addr).await,
        Verb::Eprt(addr) => port(session, addr).await,
        Verb::Pasv => pasv(session, false).await,
        Verb::Epsv => pasv(session, true).await,
        Verb::Rest(pos) => {
            session.restart_pos = pos;
            session.reply_plain(response::single(Code::RESTART_MARKER, "Restart position accepted")).await;
            Ok(())
        }
        Verb::Retr(path) => retr(session, path).await,
        Verb::Stor(path) => store(session, path, false).await,
        Verb::Appe(path) => store(session, path, true).await,
        Verb::List(arg) => list(session, arg, true).await,
        Verb::Nlst(arg) => list(session, arg, false).await,
        Verb::Mlsd(arg) => mlsd(session, arg).await,
        Verb::Mlst(arg) => mlst(session, arg).await,
        Verb::Cwd(arg) => cwd(session, arg).await,
        Verb::Cdup => {
            session.cwd = session.cwd.parent();
            session.reply_plain(response::single(Code::FILE_ACTION_OK, "Directory changed")).await;
            Ok(())
        }
        Verb::Pwd => {
            let msg = format!("\"{}\" is the current directory", session.cwd.ftp_path());
            session.reply_plain(response::single(Code::PATHNAME_CREATED, msg)).await;
            Ok(())
        }
        Verb::Mkd(arg) => mkd(session, arg).await,
        Verb::Rmd(arg) => rmd(session, arg).await,
        Verb::Dele(arg) => dele(session, arg).await,
        Verb::Rnfr(arg) => {
            session.rename_from = Some(resolve(session, &arg));
            session.reply_plain(response::single(Code::RESTART_MARKER, "File exists, ready for destination")).await;
            Ok(())
        }
        Verb::Rnto(arg) => rnto(session, arg).await,
        Verb::Size(arg) => size(session, arg).await,
        Verb::Mdtm(arg) => mdtm(session, arg).await,
        Verb::Syst => {
            session.reply_plain(response::single(Code::SYSTEM_TYPE, "UNIX Type: L8")).await;
            Ok(())
        }
        Verb::Stat => {
            session.reply_plain(response::single(Code::STATUS, "Server status OK")).await;
            Ok(())
        }
        Verb::Help => {
            session.reply_plain(response::single(Code::HELP, "Help not available")).await;
            Ok(())
        }
        Verb::Noop => {
            session.reply_plain(response::single(Code::CMD_OK, "NOOP ok")).await;
            Ok(())
        }
        Verb::Feat => {
            let lines = ["FEAT", "UTF8", "MLST size*;modify*;create*;type*;unique*;perm*;media-type*;", "PASV", "EPSV", "EPRT", "AUTH TLS", "PBSZ", "PROT", "END"];
            session.reply_plain(response::multi(Code::FEATURES, &lines)).await;
            Ok(())
        }
        Verb::Opts(arg) => opts(session, arg).await,
        Verb::Abor => {
            if let Some((ds, _)) = &session.data {
                ds.abort.store(true, std::sync::atomic::Ordering::SeqCst);
                session.reply_plain(response::single(Code::COMMAND_ABORTED, "Abort successful")).await;
            } else {
                session.reply_plain(response::single(Code::ABOR_NO_TRANSFER, "No transfer in progress")).await;
            }
            Ok(())
        }
        Verb::Auth(method) => auth(session, method).await,
        Verb::Pbsz(_) => {
            session.prot_pbsz_set = true;
            session.reply_plain(response::single(Code::CMD_OK, "PBSZ ok")).await;
            Ok(())
        }
        Verb::Prot(level) => prot(session, level).await,
        Verb::Ccc => {
            session.tls = None;
            session.reply_plain(response::single(Code::CMD_OK, "Back to clear-text")).await;
            Ok(())
        }
        Verb::Site(_) => {
            session.reply_plain(response::single(Code::SYNTAX_ERR_PARAMS, "SITE not supported")).await;
            Ok(())
        }
        Verb::Stru(s) if s == 'F' => {
            session.reply_plain(response::single(Code::CMD_OK, "Structure set to F")).await;
            Ok(())
        }
        Verb::Stru(_) => {
            session.reply_plain(response::single(Code::CMD_NOT_IMPL_PARAM, "Unsupported structure")).await;
            Ok(())
        }
        Verb::Mode(m) if m == 'S' => {
            session.reply_plain(response::single(Code::CMD_OK, "Mode set to S")).await;
            Ok(())
        }
        Verb::Mode(_) => {
            session.reply_plain(response::single(Code::CMD_NOT_IMPL_PARAM, "Unsupported mode")).await;
            Ok(())
        }
        Verb::Allo => {
            session.reply_plain(response::single(Code(202), "ALLO not needed")).await;
            Ok(())
        }
    }
}

async fn user(session: &mut FtpSession, name: String) -> Result<(), EngineError> {
    if name.is_empty() {
        session.reply_plain(response::single(Code::SYNTAX_ERR_PARAMS, "USER requires a name")).await;
        return Ok(());
    }
    session.login = LoginState::UserPending(name);
    session.reply_plain(response::single(Code::NEED_PASSWORD, "Password required")).await;
    Ok(())
}

async fn pass(session: &mut FtpSession, password: String) -> Result<(), EngineError> {
    let name = match &session.login {
        LoginState::UserPending(n) => n.clone(),
        LoginState::Authed(n) => n.clone(),
        LoginState::Unauth => {
            session.reply_plain(response::single(Code::NO_USER, "Login with USER first")).await;
            return Ok(());
        }
    };
    let client = session.client_info();
    let ok = session.authenticator.authenticate_user(&client, &password).await;
    if ok {
        session.login = LoginState::Authed(name);
        session.reply_plain(response::single(Code::LOGGED_IN, "Login successful")).await;
    } else {
        session.login = LoginState::Unauth;
        session.reply_plain(response::single(Code::NOT_LOGGED_IN, "Login incorrect")).await;
    }
    Ok(())
}

async fn type_cmd(session: &mut FtpSession, t: char) -> Result<(), EngineError> {
    match t {
        'A' => {
            session.binary = false;
            session.reply_plain(response::single(Code::CMD_OK, "Type set to A")).await;
        }
        'I' | 'L' => {
            session.binary = true;
            session.reply_plain(response::single(Code::CMD_OK, "Type set to I")).await;
        }
        _ => session.reply_plain(response::single(Code::SYNTAX_ERR_PARAMS, "Unsupported type")).await,
    }
    Ok(())
}

async fn port(session: &mut FtpSession, addr: SocketAddr) -> Result<(), EngineError> {
    session.end_transaction();
    let ds = session.data_manager.allocate_active(addr);
    session.data = Some((ds, Mode::Active));
    session.reply_plain(response::single(Code::CMD_OK, "PORT command successful")).await;
    Ok(())
}

async fn pasv(session: &mut FtpSession, extended: bool) -> Result<(), EngineError> {
    session.end_transaction();
    let bind_ip = session.remote_addr.ip();
    let local_bind = match bind_ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let (ds, addr) = session.data_manager.allocate_passive(local_bind).await?;
    session.data = Some((ds, Mode::Passive));
    if extended {
        let msg = format!("Entering Extended Passive Mode (|||{}|)", addr.port());
        session.reply_plain(response::single(Code::EXTENDED_PASSIVE, msg)).await;
    } else if let IpAddr::V4(ip) = addr.ip() {
        let octets = ip.octets();
        let p = addr.port();
        let msg = format!(
            "Entering Passive Mode ({},{},{},{},{},{})",
            octets[0], octets[1], octets[2], octets[3], p >> 8, p & 0xff
        );
        session.reply_plain(response::single(Code::PASSIVE, msg)).await;
    } else {
        let msg = format!("Entering Extended Passive Mode (|||{}|)", addr.port());
        session.reply_plain(response::single(Code::EXTENDED_PASSIVE, msg)).await;
    }
    Ok(())
}

fn resolve(session: &FtpSession, arg: &str) -> FtpPath {
    let shares: Vec<String> = session.shares.names().map(str::to_owned).collect();
    session.cwd.resolve(arg, &shares)
}

const MAX_TRANSFER_BLOCK: usize = 64 * 1024;

async fn retr(session: &mut FtpSession, arg: String) -> Result<(), EngineError> {
    if arg.is_empty() {
        session.reply_plain(response::single(Code::SYNTAX_ERR_PARAMS, "RETR requires a path")).await;
        return Ok(());
    }
    let target = resolve(session, &arg);
    let Some(share) = target.share_name().map(str::to_owned) else {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "No such file")).await;
        return Ok(());
    };
    let tree = session.get_tree(&share).await?;
    let disk = tree.disk();
    match disk.file_exists(&tree, target.share_path()).await? {
        PathStatus::FileExists => {}
        PathStatus::DirectoryExists => {
            session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "Is a directory")).await;
            return Ok(());
        }
        PathStatus::NotExist => {
            session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "File not found")).await;
            return Ok(());
        }
    }
    let Some((ds, _)) = session.data.clone() else {
        session.reply_plain(response::single(Code(425), "Use PORT or PASV first")).await;
        return Ok(());
    };
    session.reply_plain(response::single(Code::FILE_STATUS_OK_OPEN, "Opening data connection")).await;
    let mut socket = session.data_manager.get_socket(&ds).await?;
    let file = disk.open_file(&tree, target.share_path(), OpenMode::ReadOnly).await?;
    let mut pos = session.restart_pos;
    session.restart_pos = 0;
    let mut pooled = session.pool.allocate(MAX_TRANSFER_BLOCK).await?;
    let mut aborted = false;
    loop {
        let abort_pending = ds.abort.load(std::sync::atomic::Ordering::SeqCst)
            || session.poll_for_abort().unwrap_or(true);
        if abort_pending {
            aborted = true;
            break;
        }
        let n = disk.read_file(&tree, &file, pooled.as_mut_slice(), pos).await?;
        if n == 0 {
            break;
        }
        if socket.write_all(&pooled.as_slice()[..n]).await.is_err() {
            aborted = true;
            break;
        }
        pos += n as u64;
        ds.bytes_transferred.fetch_add(n as u64, std::sync::atomic::Ordering::SeqCst);
    }
    session.pool.release(pooled);
    disk.close_file(&tree, file).await.ok();
    session.data_manager.release(&ds);
    session.data = None;
    if aborted {
        session.reply_plain(response::single(Code::TRANSFER_ABORTED, "Transfer aborted")).await;
    } else {
        session.reply_plain(response::single(Code::CLOSING_DATA, "Transfer complete")).await;
    }
    Ok(())
}

async fn store(session: &mut FtpSession, arg: String, append: bool) -> Result<(), EngineError> {
    if arg.is_empty() {
        session.reply_plain(response::single(Code::SYNTAX_ERR_PARAMS, "STOR requires a path")).await;
        return Ok(());
    }
    let target = resolve(session, &arg);
    let Some(share) = target.share_name().map(str::to_owned) else {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "No such file")).await;
        return Ok(());
    };
    let tree = session.get_tree(&share).await?;
    if tree.is_read_only() {
        session.reply_plain(response::single(Code::REQUESTED_ACTION_ABORTED, "Share is read-only")).await;
        return Ok(());
    }
    let disk = tree.disk();
    let existed = matches!(
        disk.file_exists(&tree, target.share_path()).await?,
        PathStatus::FileExists
    );
    let Some((ds, _)) = session.data.clone() else {
        session.reply_plain(response::single(Code(425), "Use PORT or PASV first")).await;
        return Ok(());
    };
    session.reply_plain(response::single(Code::FILE_STATUS_OK_OPEN, "Opening data connection")).await;
    let mut socket = session.data_manager.get_socket(&ds).await?;
    let mode = if append { OpenMode::CreateOrAppend } else { OpenMode::Truncate };
    let file_result = if matches!(mode, OpenMode::Truncate) {
        disk.create_file(&tree, target.share_path(), SetAttr::default()).await
    } else {
        disk.open_file(&tree, target.share_path(), mode).await
    };
    let file = match file_result {
        Ok(f) => f,
        Err(e) => {
            session.data_manager.release(&ds);
            session.data = None;
            session.reply_plain(response::single(Code::REQUESTED_ACTION_ABORTED, e.to_string())).await;
            return Ok(());
        }
    };
    let mut pos = if append {
        disk.get_file_information(&tree, target.share_path()).await.map(|a| a.size).unwrap_or(0)
    } else {
        0
    };
    let mut pooled = session.pool.allocate(MAX_TRANSFER_BLOCK).await?;
    let mut failed = false;
    loop {
        let abort_pending = ds.abort.load(std::sync::atomic::Ordering::SeqCst)
            || session.poll_for_abort().unwrap_or(true);
        if abort_pending {
            failed = true;
            break;
        }
        let n = match socket.read(pooled.as_mut_slice()).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => {
                failed = true;
                break;
            }
        };
        if disk.write_file(&tree, &file, &pooled.as_slice()[..n], pos).await.is_err() {
            failed = true;
            break;
        }
        pos += n as u64;
    }
    session.pool.release(pooled);
    disk.close_file(&tree, file).await.ok();
    if failed && !existed {
        disk.delete_file(&tree, target.share_path()).await.ok();
    }
    session.data_manager.release(&ds);
    session.data = None;
    if failed {
        session.reply_plain(response::single(Code::TRANSFER_ABORTED, "Transfer aborted")).await;
    } else {
        session.reply_plain(response::single(Code::CLOSING_DATA, "Transfer complete")).await;
    }
    Ok(())
}

fn format_listing_line(name: &str, attr: &crate::vfs::file::Attr) -> String {
    let kind = if attr.is_dir() { 'd' } else { '-' };
    format!(
        "{}rwxr-xr-x 1 owner group {:>12} {} {}",
        kind,
        attr.size,
        format_time_short(&attr.mtime),
        name
    )
}

fn format_time_short(t: &Time) -> String {
    format!("{}", t.seconds)
}

async fn list(session: &mut FtpSession, arg: Option<String>, long: bool) -> Result<(), EngineError> {
    let target = resolve(session, arg.as_deref().unwrap_or(""));
    let Some(share) = target.share_name().map(str::to_owned) else {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "No such directory")).await;
        return Ok(());
    };
    let tree = session.get_tree(&share).await?;
    let disk = tree.disk();
    let Some((ds, _)) = session.data.clone() else {
        session.reply_plain(response::single(Code(425), "Use PORT or PASV first")).await;
        return Ok(());
    };
    session.reply_plain(response::single(Code::FILE_STATUS_OK_OPEN, "Opening data connection")).await;
    let mut socket = session.data_manager.get_socket(&ds).await?;
    let mut search = disk.start_search(&tree, target.share_path(), "*").await?;
    let mut body = String::new();
    loop {
        let (entries, eof) = disk.read_search(&tree, &mut search, 256).await?;
        for e in &entries {
            if long {
                body.push_str(&format_listing_line(&e.name, &e.attr));
            } else {
                body.push_str(&e.name);
            }
            body.push_str("\r\n");
        }
        if eof {
            break;
        }
    }
    let write_err = socket.write_all(body.as_bytes()).await.is_err();
    session.data_manager.release(&ds);
    session.data = None;
    if write_err {
        session.reply_plain(response::single(Code::REQUESTED_ACTION_ABORTED, "Listing failed")).await;
    } else {
        session.reply_plain(response::single(Code::CLOSING_DATA, "Transfer complete")).await;
    }
    Ok(())
}

fn mlst_facts(name: &str, attr: &crate::vfs::file::Attr) -> String {
    let file_type = if attr.is_dir() { "dir" } else { "file" };
    format!(
        "size={};modify={};create={};type={};unique={:x};perm={};media-type=application/octet-stream; {}",
        attr.size, attr.mtime.seconds, attr.ctime.seconds, file_type, attr.fileid,
        if attr.is_dir() { "el" } else { "r" }, name
    )
}

async fn mlst(session: &mut FtpSession, arg: Option<String>) -> Result<(), EngineError> {
    let target = resolve(session, arg.as_deref().unwrap_or(""));
    let Some(share) = target.share_name().map(str::to_owned) else {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "No such file")).await;
        return Ok(());
    };
    let tree = session.get_tree(&share).await?;
    let disk = tree.disk();
    let attr = disk.get_file_information(&tree, target.share_path()).await?;
    let (_, name) = target.share_path().parent_and_name();
    let fact_line = mlst_facts(name.unwrap_or(&share), &attr);
    session.reply_plain(response::multi(Code(250), &["Listing", &fact_line, "End"])).await;
    Ok(())
}

async fn mlsd(session: &mut FtpSession, arg: Option<String>) -> Result<(), EngineError> {
    let target = resolve(session, arg.as_deref().unwrap_or(""));
    let Some(share) = target.share_name().map(str::to_owned) else {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "No such directory")).await;
        return Ok(());
    };
    let tree = session.get_tree(&share).await?;
    let disk = tree.disk();
    let Some((ds, _)) = session.data.clone() else {
        session.reply_plain(response::single(Code(425), "Use PORT or PASV first")).await;
        return Ok(());
    };
    session.reply_plain(response::single(Code::FILE_STATUS_OK_OPEN, "Opening data connection")).await;
    let mut socket = session.data_manager.get_socket(&ds).await?;
    let mut search = disk.start_search(&tree, target.share_path(), "*").await?;
    let mut body = String::new();
    loop {
        let (entries, eof) = disk.read_search(&tree, &mut search, 256).await?;
        for e in &entries {
            body.push_str(&mlst_facts(&e.name, &e.attr));
            body.push_str("\r\n");
        }
        if eof {
            break;
        }
    }
    let write_err = socket.write_all(body.as_bytes()).await.is_err();
    session.data_manager.release(&ds);
    session.data = None;
    if write_err {
        session.reply_plain(response::single(Code::REQUESTED_ACTION_ABORTED, "Listing failed")).await;
    } else {
        session.reply_plain(response::single(Code::CLOSING_DATA, "Transfer complete")).await;
    }
    Ok(())
}

async fn cwd(session: &mut FtpSession, arg: String) -> Result<(), EngineError> {
    let target = resolve(session, &arg);
    if let Some(share) = target.share_name() {
        let tree = session.get_tree(share).await?;
        match tree.disk().file_exists(&tree, target.share_path()).await? {
            PathStatus::DirectoryExists => {}
            _ => {
                session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "No such directory")).await;
                return Ok(());
            }
        }
    }
    session.cwd = target;
    session.reply_plain(response::single(Code::FILE_ACTION_OK, "Directory changed")).await;
    Ok(())
}

async fn mkd(session: &mut FtpSession, arg: String) -> Result<(), EngineError> {
    let target = resolve(session, &arg);
    let Some(share) = target.share_name().map(str::to_owned) else {
        session.reply_plain(response::single(Code::SYNTAX_ERR_PARAMS, "Invalid path")).await;
        return Ok(());
    };
    let tree = session.get_tree(&share).await?;
    if tree.is_read_only() {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "Share is read-only")).await;
        return Ok(());
    }
    tree.disk().create_directory(&tree, target.share_path()).await?;
    let msg = format!("\"{}\" directory created", target.ftp_path());
    session.reply_plain(response::single(Code::PATHNAME_CREATED, msg)).await;
    Ok(())
}

async fn rmd(session: &mut FtpSession, arg: String) -> Result<(), EngineError> {
    let target = resolve(session, &arg);
    let Some(share) = target.share_name().map(str::to_owned) else {
        session.reply_plain(response::single(Code::SYNTAX_ERR_PARAMS, "Invalid path")).await;
        return Ok(());
    };
    if target.share_path().is_root() {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "Cannot remove share root")).await;
        return Ok(());
    }
    let tree = session.get_tree(&share).await?;
    if tree.is_read_only() {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "Share is read-only")).await;
        return Ok(());
    }
    tree.disk().delete_directory(&tree, target.share_path()).await?;
    session.reply_plain(response::single(Code::FILE_ACTION_OK, "Directory removed")).await;
    Ok(())
}

async fn dele(session: &mut FtpSession, arg: String) -> Result<(), EngineError> {
    let target = resolve(session, &arg);
    let Some(share) = target.share_name().map(str::to_owned) else {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "No such file")).await;
        return Ok(());
    };
    let tree = session.get_tree(&share).await?;
    if tree.is_read_only() {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "Share is read-only")).await;
        return Ok(());
    }
    tree.disk().delete_file(&tree, target.share_path()).await?;
    session.reply_plain(response::single(Code::FILE_ACTION_OK, "File deleted")).await;
    Ok(())
}

async fn rnto(session: &mut FtpSession, arg: String) -> Result<(), EngineError> {
    let Some(from) = session.rename_from.take() else {
        session.reply_plain(response::single(Code::SYNTAX_ERR_PARAMS, "RNFR required first")).await;
        return Ok(());
    };
    let to = resolve(session, &arg);
    // Rename atomicity across shares: the two
    // paths must resolve to the same share.
    if from.share_name() != to.share_name() {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "Cannot rename across shares")).await;
        return Ok(());
    }
    let Some(share) = from.share_name().map(str::to_owned) else {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "No such file")).await;
        return Ok(());
    };
    let tree = session.get_tree(&share).await?;
    tree.disk().rename_file(&tree, from.share_path(), to.share_path()).await?;
    session.reply_plain(response::single(Code::FILE_ACTION_OK, "Rename successful")).await;
    Ok(())
}

async fn size(session: &mut FtpSession, arg: String) -> Result<(), EngineError> {
    let target = resolve(session, &arg);
    let Some(share) = target.share_name().map(str::to_owned) else {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "No such file")).await;
        return Ok(());
    };
    let tree = session.get_tree(&share).await?;
    let attr = tree.disk().get_file_information(&tree, target.share_path()).await?;
    session.reply_plain(response::single(Code::FILE_STATUS, attr.size.to_string())).await;
    Ok(())
}

async fn mdtm(session: &mut FtpSession, arg: String) -> Result<(), EngineError> {
    // MDTM set-form: `YYYYMMDDHHMMSS[.mmm] <path>`.
    let (maybe_ts, path_arg) = match arg.split_once(' ') {
        Some((ts, p)) if ts.len() >= 14 && ts.chars().take(14).all(|c| c.is_ascii_digit()) => {
            (Some(ts), p)
        }
        _ => (None, arg.as_str()),
    };
    let target = resolve(session, path_arg);
    let Some(share) = target.share_name().map(str::to_owned) else {
        session.reply_plain(response::single(Code::FILE_UNAVAILABLE, "No such file")).await;
        return Ok(());
    };
    let tree = session.get_tree(&share).await?;
    let disk = tree.disk();
    if let Some(ts) = maybe_ts {
        if let Some(epoch) = parse_ftp_timestamp(ts) {
            let info = SetFileInfo {
                attr: Some(SetAttr {
                    mtime: Some(SetTime::ClientProvided(Time { seconds: epoch, nanos: 0 })),
                    ..Default::default()
                }),
                delete_on_close: None,
            };
            disk.set_file_information(&tree, target.share_path(), info).await?;
            session.reply_plain(response::single(Code::FILE_ACTION_OK, "Modify time set")).await;
            return Ok(());
        }
    }
    let attr = disk.get_file_information(&tree, target.share_path()).await?;
    session.reply_plain(response::single(Code::FILE_STATUS, format!("{}", attr.mtime.seconds))).await;
    Ok(())
}

/// Parses `YYYYMMDDHHMMSS` (UTC, no leap-second handling) into a Unix
/// epoch second count without pulling in a chrono-class dependency.
fn parse_ftp_timestamp(ts: &str) -> Option<i64> {
    let digits = &ts.as_bytes()[..14];
    let field = |s: usize, l: usize| -> Option<i64> {
        std::str::from_utf8(&digits[s..s + l]).ok()?.parse().ok()
    };
    let year = field(0, 4)?;
    let month = field(4, 2)?;
    let day = field(6, 2)?;
    let hour = field(8, 2)?;
    let min = field(10, 2)?;
    let sec = field(12, 2)?;
    Some(days_from_civil(year, month, day) * 86_400 + hour * 3600 + min * 60 + sec)
}

/// Howard Hinnant's civil-from-days algorithm, inverted: days since the
/// Unix epoch for a `(year, month, day)` triple.
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

async fn opts(session: &mut FtpSession, arg: String) -> Result<(), EngineError> {
    let mut parts = arg.splitn(2, ' ');
    match parts.next().unwrap_or("").to_ascii_uppercase().as_str() {
        "UTF8" => {
            let v = parts.next().unwrap_or("").to_ascii_uppercase();
            session.utf8 = v != "OFF";
            session.reply_plain(response::single(Code::CMD_OK, "UTF8 set")).await;
        }
        "MLST" => {
            session.reply_plain(response::single(Code::CMD_OK, "MLST OPTS set")).await;
        }
        _ => session.reply_plain(response::single(Code::SYNTAX_ERR_PARAMS, "Unknown OPTS")).await,
    }
    Ok(())
}

async fn auth(session: &mut FtpSession, method: String) -> Result<(), EngineError> {
    if method != "TLS" && method != "SSL" {
        session.reply_plain(response::single(Code::CMD_NOT_IMPL_PARAM, "Unsupported AUTH method")).await;
        return Ok(());
    }
    let Some(config) = session.tls_config.clone() else {
        session.reply_plain(response::single(Code::NOT_LOGGED_IN, "FTPS not enabled")).await;
        return Ok(());
    };
    session.tls = Some(TlsEngine::new(config)?);
    // The 234 reply is always sent in cleartext before the handshake.
    session.reply_plain(response::single(Code::AUTH_OK, "AUTH command ok, starting TLS handshake")).await;
    session.drive_tls_handshake().await?;
    Ok(())
}

async fn prot(session: &mut FtpSession, level: char) -> Result<(), EngineError> {
    if !session.prot_pbsz_set {
        session.reply_plain(response::single(Code::NO_PBSZ, "PBSZ required first")).await;
        return Ok(());
    }
    if level != 'C' {
        session.reply_plain(response::single(Code::PROT_BAD_LEVEL, "Only PROT C supported")).await;
        return Ok(());
    }
    session.prot_level = ProtLevel::Clear;
    session.reply_plain(response::single(Code::CMD_OK, "PROT set to C")).await;
    Ok(())
}
