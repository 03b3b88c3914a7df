//! Command-line front end.
//!
//! Public surface: `agentd [-F] <command>` with `help`, `readconfig` and
//! `start`. The hidden `-P <subcommand>` dispatch re-enters the binary as
//! a private service after privilege separation; it is not documented to
//! users and unknown values produce a generic error.

use crate::bootstrap::BootstrapConfig;
use crate::config::AgentConfig;
use crate::strings::concat_all;
use crate::supervisor;
use crate::{fds, services};
use clap::Parser;
use std::io::Write;
use std::os::unix::io::RawFd;

#[derive(Debug, Parser)]
#[command(name = "agentd", disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// Run in foreground (non-daemon mode).
    #[arg(short = 'F')]
    foreground: bool,

    /// Private sub-command dispatch after re-exec.
    #[arg(short = 'P', hide = true, conflicts_with = "command")]
    private: Option<String>,

    /// The command to run.
    command: Option<String>,
}

/// Parses the command line and runs the selected command.
///
/// Returns the process exit code.
pub fn dispatch(args: &[String]) -> i32 {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(_) => return print_usage(&mut std::io::stderr(), 1),
    };

    let mut bconf = BootstrapConfig::new();
    bconf.set_foreground(cli.foreground);
    let invoked = args.first().map(String::as_str).unwrap_or("agentd");
    if bconf.set_binary(invoked).is_ok() {
        let _ = bconf.resolve_prefix_dir();
    }

    if let Some(private) = cli.private.as_deref() {
        return dispatch_private_command(private);
    }

    match cli.command.as_deref() {
        Some("help") => print_usage(&mut std::io::stdout(), 0),
        Some("readconfig") => command_readconfig(&bconf),
        Some("start") => supervisor::command_start(&bconf),
        Some(other) => {
            eprintln!("Unknown command: {other}.\n");
            print_usage(&mut std::io::stderr(), 1)
        }
        None => {
            eprintln!("Expecting command.\n");
            print_usage(&mut std::io::stderr(), 1)
        }
    }
}

/// Prints usage and returns the given exit code.
pub fn print_usage(out: &mut dyn Write, returncode: i32) -> i32 {
    let _ = writeln!(out, "Usage: agentd [-F] command\n");
    let _ = writeln!(out, "Where:");
    let _ = writeln!(out, "\t\t-F         \tRun in foreground (non-daemon mode).");
    let _ = writeln!(out);
    let _ = writeln!(out, "supported commands:");
    let _ = writeln!(out, "\t\thelp       \tPrint this help info.");
    let _ = writeln!(
        out,
        "\t\treadconfig \tRead the config file and display settings."
    );
    let _ = writeln!(out, "\t\tstart      \tStart the agentd supervisor.");
    returncode
}

/// The public `readconfig` command: parse and display the configuration.
fn command_readconfig(bconf: &BootstrapConfig) -> i32 {
    let Some(prefix) = bconf.prefix_dir.as_deref() else {
        eprintln!("agentd: cannot resolve installation prefix.");
        return 1;
    };
    let path = concat_all(&[prefix, &bconf.config_file]);

    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("agentd: cannot read {path}: {e}");
            return 1;
        }
    };
    match AgentConfig::from_toml(&text) {
        Ok(parsed) => {
            print!("{}", parsed.to_toml());
            0
        }
        Err(e) => {
            eprintln!("agentd: {e}");
            1
        }
    }
}

/// Dispatches a private sub-command on its well-known descriptors.
///
/// `-P` is undocumented; unknown values get a terse error.
fn dispatch_private_command(name: &str) -> i32 {
    let status = match name {
        "readconfig" => services::readconfig::run(fds::CONFIG_IN, fds::CONFIG_OUT),
        "dataservice" => services::data::event_loop(
            fds::DATASERVICE_SOCK,
            fds::DATASERVICE_LOG,
            Some(fds::DATASERVICE_SOCK_SECONDARY),
        ),
        "randomservice" => {
            services::random::event_loop(fds::RANDOMSERVICE_SOCK, fds::RANDOMSERVICE_LOG)
        }
        "authservice" => services::auth::event_loop(fds::AUTHSERVICE_SOCK, fds::AUTHSERVICE_LOG),
        "canonizationservice" => services::canonization::event_loop(
            fds::CANONIZATION_DATA,
            fds::CANONIZATION_LOG,
            fds::CANONIZATION_CONTROL,
        ),
        "unauthorized_protocol_service" => services::protocol::event_loop(
            fds::PROTOCOLSERVICE_ACCEPT,
            fds::PROTOCOLSERVICE_LOG,
            fds::PROTOCOLSERVICE_DATA,
            fds::PROTOCOLSERVICE_CONTROL,
        ),
        "listenservice" => {
            let listen_fds = probe_listen_fds(fds::LISTENSERVICE_SOCK_START);
            services::listen::event_loop(
                fds::LISTENSERVICE_LOG,
                fds::LISTENSERVICE_ACCEPT,
                &listen_fds,
            )
        }
        "supervisor" => supervisor::private_command_supervisor(),
        _ => {
            eprintln!("Invalid option.\n");
            return 1;
        }
    };
    status as i32
}

/// The listen service learns its socket count by probing consecutive
/// slots for open descriptors.
fn probe_listen_fds(start: RawFd) -> Vec<RawFd> {
    let mut out = Vec::new();
    let mut fd = start;
    while nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFL).is_ok() {
        out.push(fd);
        fd += 1;
    }
    out
}
